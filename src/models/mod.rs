pub mod certificado;
pub mod consulta;
pub mod documento_descoberto;
pub mod nfe_document;
