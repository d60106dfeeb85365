pub mod certificado_service;
pub mod consulta_service;
pub mod functional_patterns;
pub mod importacao_service;
pub mod sefaz_client;
pub mod sefaz_parser;
