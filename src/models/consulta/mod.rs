//! SEFAZ Query Run Module
//!
//! One row per document-discovery run. The status column is a one-way
//! state machine: PENDENTE -> PROCESSANDO -> {CONCLUIDA, ERRO}. Terminal
//! runs are never resumed; a retry is a brand-new run. Rows are retained
//! indefinitely for audit.

use std::fmt;
use std::str::FromStr;

use crate::schema::consultas_sefaz;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Fiscal document families the discovery supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TipoDocumento {
    Nfe,
    Cte,
    Nfce,
    Mdfe,
}

impl TipoDocumento {
    pub fn as_str(self) -> &'static str {
        match self {
            TipoDocumento::Nfe => "NFE",
            TipoDocumento::Cte => "CTE",
            TipoDocumento::Nfce => "NFCE",
            TipoDocumento::Mdfe => "MDFE",
        }
    }
}

impl fmt::Display for TipoDocumento {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TipoDocumento {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NFE" => Ok(TipoDocumento::Nfe),
            "CTE" => Ok(TipoDocumento::Cte),
            "NFCE" => Ok(TipoDocumento::Nfce),
            "MDFE" => Ok(TipoDocumento::Mdfe),
            other => Err(format!("unknown document type: {other}")),
        }
    }
}

/// Run status. `Concluida` and `Erro` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusConsulta {
    Pendente,
    Processando,
    Concluida,
    Erro,
}

impl StatusConsulta {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusConsulta::Pendente => "PENDENTE",
            StatusConsulta::Processando => "PROCESSANDO",
            StatusConsulta::Concluida => "CONCLUIDA",
            StatusConsulta::Erro => "ERRO",
        }
    }

    pub fn terminal(self) -> bool {
        matches!(self, StatusConsulta::Concluida | StatusConsulta::Erro)
    }

    /// Allowed one-way transitions of the run state machine.
    pub fn pode_transicionar(self, destino: StatusConsulta) -> bool {
        matches!(
            (self, destino),
            (StatusConsulta::Pendente, StatusConsulta::Processando)
                | (StatusConsulta::Processando, StatusConsulta::Concluida)
                | (StatusConsulta::Processando, StatusConsulta::Erro)
        )
    }
}

impl fmt::Display for StatusConsulta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusConsulta {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDENTE" => Ok(StatusConsulta::Pendente),
            "PROCESSANDO" => Ok(StatusConsulta::Processando),
            "CONCLUIDA" => Ok(StatusConsulta::Concluida),
            "ERRO" => Ok(StatusConsulta::Erro),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[derive(Queryable, Identifiable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = consultas_sefaz)]
pub struct ConsultaSefaz {
    pub id: i32,
    pub certificado_id: i32,
    pub tipo_documento: String,
    pub uf: String,
    pub data_inicio: NaiveDate,
    pub data_fim: NaiveDate,
    pub status: String,
    pub total_encontrados: i32,
    pub total_importados: i32,
    pub total_erros: i32,
    pub mensagem_erro: String,
    pub log_detalhado: String,
    pub data_consulta: DateTime<Utc>,
    pub data_conclusao: Option<DateTime<Utc>>,
}

impl ConsultaSefaz {
    pub fn status_enum(&self) -> Option<StatusConsulta> {
        self.status.parse().ok()
    }

    pub fn tipo_enum(&self) -> Option<TipoDocumento> {
        self.tipo_documento.parse().ok()
    }
}

#[derive(Insertable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = consultas_sefaz)]
pub struct NovaConsulta {
    pub certificado_id: i32,
    pub tipo_documento: String,
    pub uf: String,
    pub data_inicio: NaiveDate,
    pub data_fim: NaiveDate,
    pub status: String,
}

impl NovaConsulta {
    pub fn pendente(
        certificado_id: i32,
        tipo: TipoDocumento,
        uf: impl Into<String>,
        data_inicio: NaiveDate,
        data_fim: NaiveDate,
    ) -> Self {
        Self {
            certificado_id,
            tipo_documento: tipo.as_str().to_string(),
            uf: uf.into(),
            data_inicio,
            data_fim,
            status: StatusConsulta::Pendente.as_str().to_string(),
        }
    }
}

pub mod operations;
