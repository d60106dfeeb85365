//! NFE Document Module
//!
//! The authoritative business record. Rows here are created only by the
//! explicit import step (`services::importacao_service`) from a discovered
//! document, never directly by the discovery pipeline.

use crate::schema::{nfe_documents, nfe_itens};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Queryable, Identifiable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = nfe_documents)]
pub struct NfeDocument {
    pub id: i32,
    pub tenant_id: String,
    pub chave_acesso: String,
    pub numero: String,
    pub serie: String,
    pub data_emissao: DateTime<Utc>,
    pub emit_cnpj: String,
    pub emit_nome: String,
    pub dest_cnpj: String,
    pub dest_nome: String,
    pub valor_total: Decimal,
    pub valor_produtos: Decimal,
    pub status_nfe: String,
    pub protocolo: String,
    pub xml_content: String,
    pub data_importacao: DateTime<Utc>,
}

#[derive(Insertable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = nfe_documents)]
pub struct NewNfeDocument {
    pub tenant_id: String,
    pub chave_acesso: String,
    pub numero: String,
    pub serie: String,
    pub data_emissao: DateTime<Utc>,
    pub emit_cnpj: String,
    pub emit_nome: String,
    pub dest_cnpj: String,
    pub dest_nome: String,
    pub valor_total: Decimal,
    pub valor_produtos: Decimal,
    pub status_nfe: String,
    pub protocolo: String,
    pub xml_content: String,
    pub data_importacao: DateTime<Utc>,
}

#[derive(Queryable, Identifiable, Associations, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = nfe_itens)]
#[diesel(belongs_to(NfeDocument, foreign_key = nfe_id))]
pub struct NfeItem {
    pub id: i32,
    pub nfe_id: i32,
    pub numero_item: i32,
    pub codigo_produto: String,
    pub descricao: String,
    pub ncm: String,
    pub cfop: String,
    pub unidade: String,
    pub quantidade: Decimal,
    pub valor_unitario: Decimal,
    pub valor_total: Decimal,
}

#[derive(Insertable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = nfe_itens)]
pub struct NewNfeItem {
    pub nfe_id: i32,
    pub numero_item: i32,
    pub codigo_produto: String,
    pub descricao: String,
    pub ncm: String,
    pub cfop: String,
    pub unidade: String,
    pub quantidade: Decimal,
    pub valor_unitario: Decimal,
    pub valor_total: Decimal,
}

pub mod operations;
pub mod validators;
