pub mod db;
pub mod sefaz;
