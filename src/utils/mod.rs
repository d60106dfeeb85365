pub mod segredo;
