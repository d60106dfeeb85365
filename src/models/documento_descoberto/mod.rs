//! Discovered Document Module
//!
//! Documents found by SEFAZ discovery runs, keyed by the 44-digit access
//! key. The key is globally unique across all runs: a document observed
//! by two runs is recorded once, first writer wins. The database
//! constraint enforces this, since runs may execute on separate workers.

use std::fmt;
use std::str::FromStr;

use crate::schema::documentos_descobertos;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The queried CNPJ's role in a given fiscal document, derived from which
/// node of the document XML carried that CNPJ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PapelCnpj {
    Emitente,
    Destinatario,
    Transportador,
    Remetente,
    Expedidor,
    Recebedor,
    Tomador,
}

impl PapelCnpj {
    pub fn as_str(self) -> &'static str {
        match self {
            PapelCnpj::Emitente => "EMITENTE",
            PapelCnpj::Destinatario => "DESTINATARIO",
            PapelCnpj::Transportador => "TRANSPORTADOR",
            PapelCnpj::Remetente => "REMETENTE",
            PapelCnpj::Expedidor => "EXPEDIDOR",
            PapelCnpj::Recebedor => "RECEBEDOR",
            PapelCnpj::Tomador => "TOMADOR",
        }
    }
}

impl fmt::Display for PapelCnpj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PapelCnpj {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EMITENTE" => Ok(PapelCnpj::Emitente),
            "DESTINATARIO" => Ok(PapelCnpj::Destinatario),
            "TRANSPORTADOR" => Ok(PapelCnpj::Transportador),
            "REMETENTE" => Ok(PapelCnpj::Remetente),
            "EXPEDIDOR" => Ok(PapelCnpj::Expedidor),
            "RECEBEDOR" => Ok(PapelCnpj::Recebedor),
            "TOMADOR" => Ok(PapelCnpj::Tomador),
            other => Err(format!("unknown CNPJ role: {other}")),
        }
    }
}

#[derive(Queryable, Identifiable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = documentos_descobertos)]
pub struct DocumentoDescoberto {
    pub id: i32,
    pub consulta_id: i32,
    pub chave_acesso: String,
    pub numero: String,
    pub serie: String,
    pub data_emissao: DateTime<Utc>,
    pub papel_cnpj: String,
    pub emit_cnpj: String,
    pub emit_nome: String,
    pub dest_cnpj: String,
    pub dest_nome: String,
    pub valor_total: Decimal,
    pub xml_completo: String,
    pub xml_baixado: bool,
    pub importado: bool,
    pub data_importacao: Option<DateTime<Utc>>,
}

#[derive(Insertable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = documentos_descobertos)]
pub struct NovoDocumentoDescoberto {
    pub consulta_id: i32,
    pub chave_acesso: String,
    pub numero: String,
    pub serie: String,
    pub data_emissao: DateTime<Utc>,
    pub papel_cnpj: String,
    pub emit_cnpj: String,
    pub emit_nome: String,
    pub dest_cnpj: String,
    pub dest_nome: String,
    pub valor_total: Decimal,
    pub xml_completo: String,
    pub xml_baixado: bool,
}

pub mod operations;
