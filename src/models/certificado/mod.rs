//! Digital Certificate Module
//!
//! A1 certificates (PKCS#12 files) used for the mutual-TLS SEFAZ queries.
//! The PFX bytes and the password are stored sealed (AES-256-GCM); only
//! `services::certificado_service` ever sees them in the clear, and only
//! for the duration of a run.

use crate::schema::certificados_digitais;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Queryable, Identifiable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = certificados_digitais)]
pub struct CertificadoDigital {
    pub id: i32,
    pub tenant_id: String,
    pub nome: String,
    pub cnpj: String,
    pub uf: String,
    #[serde(skip_serializing)]
    pub arquivo_pfx: Vec<u8>,
    #[serde(skip_serializing)]
    pub senha_pfx: Vec<u8>,
    pub validade_inicio: NaiveDate,
    pub validade_fim: NaiveDate,
    pub emissor: String,
    pub ativo: bool,
    pub consulta_automatica: bool,
    pub intervalo_consulta: i32,
    pub ultima_consulta: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CertificadoDigital {
    /// A certificate is usable only while today is inside its window.
    pub fn esta_vigente(&self, hoje: NaiveDate) -> bool {
        self.validade_inicio <= hoje && hoje <= self.validade_fim
    }

    /// Whether the automatic-query interval has elapsed since the last run.
    pub fn consulta_devida(&self, agora: DateTime<Utc>) -> bool {
        if !self.ativo || !self.consulta_automatica {
            return false;
        }
        match self.ultima_consulta {
            None => true,
            Some(ultima) => {
                agora - ultima >= chrono::Duration::minutes(i64::from(self.intervalo_consulta))
            }
        }
    }
}

#[derive(Insertable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = certificados_digitais)]
pub struct NovoCertificado {
    pub tenant_id: String,
    pub nome: String,
    pub cnpj: String,
    pub uf: String,
    #[serde(skip_serializing)]
    pub arquivo_pfx: Vec<u8>,
    #[serde(skip_serializing)]
    pub senha_pfx: Vec<u8>,
    pub validade_inicio: NaiveDate,
    pub validade_fim: NaiveDate,
    pub emissor: String,
    pub ativo: bool,
    pub consulta_automatica: bool,
    pub intervalo_consulta: i32,
}

#[derive(AsChangeset, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = certificados_digitais)]
#[diesel(treat_none_as_null = false)]
pub struct AtualizarCertificado {
    pub nome: Option<String>,
    pub ativo: Option<bool>,
    pub consulta_automatica: Option<bool>,
    pub intervalo_consulta: Option<i32>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub mod operations;
pub mod validators;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn certificado(validade_inicio: NaiveDate, validade_fim: NaiveDate) -> CertificadoDigital {
        let agora = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        CertificadoDigital {
            id: 1,
            tenant_id: "t1".into(),
            nome: "Matriz".into(),
            cnpj: "12345678000190".into(),
            uf: "SP".into(),
            arquivo_pfx: vec![],
            senha_pfx: vec![],
            validade_inicio,
            validade_fim,
            emissor: "AC Teste".into(),
            ativo: true,
            consulta_automatica: true,
            intervalo_consulta: 60,
            ultima_consulta: None,
            created_at: agora,
            updated_at: agora,
        }
    }

    #[test]
    fn vigencia_respeita_os_limites() {
        let cert = certificado(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        );
        assert!(cert.esta_vigente(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(cert.esta_vigente(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()));
        assert!(!cert.esta_vigente(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()));
        assert!(!cert.esta_vigente(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
    }

    #[test]
    fn consulta_devida_depende_do_intervalo() {
        let mut cert = certificado(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        );
        let agora = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();

        assert!(cert.consulta_devida(agora));

        cert.ultima_consulta = Some(agora - chrono::Duration::minutes(30));
        assert!(!cert.consulta_devida(agora));

        cert.ultima_consulta = Some(agora - chrono::Duration::minutes(61));
        assert!(cert.consulta_devida(agora));

        cert.consulta_automatica = false;
        assert!(!cert.consulta_devida(agora));
    }
}
