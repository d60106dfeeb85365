//! Injectable SEFAZ endpoint and region configuration.
//!
//! The per-state webservice URLs and IBGE region codes are immutable data
//! owned by this struct and handed to the client at construction, so tests
//! can substitute fake endpoints without touching globals.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::constants;
use crate::error::SefazError;

/// Which government webservice a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServicoSefaz {
    NfeStatus,
    NfeDistribuicao,
    CteStatus,
}

impl fmt::Display for ServicoSefaz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nome = match self {
            ServicoSefaz::NfeStatus => "NfeStatusServico",
            ServicoSefaz::NfeDistribuicao => "NFeDistribuicaoDFe",
            ServicoSefaz::CteStatus => "CteStatusServico",
        };
        f.write_str(nome)
    }
}

/// Production (1) or homologation (2) environment indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ambiente {
    Producao,
    Homologacao,
}

impl Ambiente {
    pub fn codigo(self) -> u8 {
        match self {
            Ambiente::Producao => 1,
            Ambiente::Homologacao => 2,
        }
    }

    pub fn from_env_var(valor: &str) -> Self {
        match valor.trim() {
            "2" | "homologacao" | "homolog" => Ambiente::Homologacao,
            _ => Ambiente::Producao,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SefazConfig {
    pub ambiente: Ambiente,
    endpoints: HashMap<(ServicoSefaz, String), String>,
    codigos_uf: HashMap<String, &'static str>,
    pub timeout_status: Duration,
    pub timeout_distribuicao: Duration,
    pub max_documentos_por_consulta: u32,
    pub max_paginas_por_consulta: u32,
}

impl SefazConfig {
    /// Configuration with no endpoints; building block for tests.
    pub fn vazia(ambiente: Ambiente) -> Self {
        Self {
            ambiente,
            endpoints: HashMap::new(),
            codigos_uf: codigos_uf_ibge(),
            timeout_status: Duration::from_secs(constants::TIMEOUT_STATUS_SEGUNDOS),
            timeout_distribuicao: Duration::from_secs(constants::TIMEOUT_DISTRIBUICAO_SEGUNDOS),
            max_documentos_por_consulta: constants::MAX_DOCUMENTOS_PADRAO,
            max_paginas_por_consulta: constants::MAX_PAGINAS_PADRAO,
        }
    }

    /// Production endpoint tables.
    ///
    /// The NFe distribution service is national (hosted at the "Ambiente
    /// Nacional"), so every mapped UF points at the same URL; status
    /// services are state-hosted.
    pub fn producao() -> Self {
        let mut config = Self::vazia(Ambiente::Producao);

        const NFE_STATUS: &[(&str, &str)] = &[
            ("SP", "https://nfe.fazenda.sp.gov.br/ws/nfestatusservico4.asmx"),
            ("RJ", "https://nfe.fazenda.rj.gov.br/ws/nfestatusservico4.asmx"),
            ("MG", "https://nfe.fazenda.mg.gov.br/nfe2/services/NFeStatusServico4"),
            ("RS", "https://nfe.sefazrs.rs.gov.br/ws/NfeStatusServico/NfeStatusServico4.asmx"),
            ("PR", "https://nfe.sefa.pr.gov.br/nfe/NFeStatusServico4"),
            ("SC", "https://nfe.svrs.rs.gov.br/ws/NfeStatusServico/NfeStatusServico4.asmx"),
            ("BA", "https://nfe.sefaz.ba.gov.br/webservices/NFeStatusServico4/NFeStatusServico4.asmx"),
            ("PE", "https://nfe.sefaz.pe.gov.br/nfe-service/services/NFeStatusServico4"),
            ("CE", "https://nfe.sefaz.ce.gov.br/nfe2/services/NFeStatusServico4"),
        ];

        const CTE_STATUS: &[(&str, &str)] = &[
            ("SP", "https://nfe.fazenda.sp.gov.br/ws/ctestatusservico.asmx"),
            ("RJ", "https://cte.fazenda.rj.gov.br/ws/ctestatusservico.asmx"),
            ("MG", "https://cte.fazenda.mg.gov.br/cte/services/CTeStatusServico"),
        ];

        const NFE_DISTRIBUICAO_AN: &str =
            "https://www1.nfe.fazenda.gov.br/NFeDistribuicaoDFe/NFeDistribuicaoDFe.asmx";

        for (uf, url) in NFE_STATUS {
            config.registrar_endpoint(ServicoSefaz::NfeStatus, uf, url);
            config.registrar_endpoint(ServicoSefaz::NfeDistribuicao, uf, NFE_DISTRIBUICAO_AN);
        }
        for (uf, url) in CTE_STATUS {
            config.registrar_endpoint(ServicoSefaz::CteStatus, uf, url);
        }

        config
    }

    pub fn registrar_endpoint(&mut self, servico: ServicoSefaz, uf: &str, url: &str) {
        self.endpoints
            .insert((servico, uf.to_uppercase()), url.to_string());
    }

    /// Resolve the URL for a state/service pair.
    ///
    /// An unmapped pair is an explicit error; there is no fallback to a
    /// default state, which would silently query the wrong jurisdiction.
    pub fn endpoint(&self, servico: ServicoSefaz, uf: &str) -> Result<&str, SefazError> {
        self.endpoints
            .get(&(servico, uf.to_uppercase()))
            .map(String::as_str)
            .ok_or_else(|| SefazError::UnsupportedRegion {
                uf: uf.to_uppercase(),
                servico: servico.to_string(),
            })
    }

    /// IBGE numeric code for a state, required by the SOAP payloads.
    pub fn codigo_uf(&self, uf: &str) -> Result<&'static str, SefazError> {
        self.codigos_uf
            .get(&uf.to_uppercase())
            .copied()
            .ok_or_else(|| SefazError::UnsupportedRegion {
                uf: uf.to_uppercase(),
                servico: "codigoUF".to_string(),
            })
    }

    pub fn suporta(&self, servico: ServicoSefaz, uf: &str) -> bool {
        self.endpoints.contains_key(&(servico, uf.to_uppercase()))
    }
}

fn codigos_uf_ibge() -> HashMap<String, &'static str> {
    [
        ("RO", "11"), ("AC", "12"), ("AM", "13"), ("RR", "14"), ("PA", "15"),
        ("AP", "16"), ("TO", "17"), ("MA", "21"), ("PI", "22"), ("CE", "23"),
        ("RN", "24"), ("PB", "25"), ("PE", "26"), ("AL", "27"), ("SE", "28"),
        ("BA", "29"), ("MG", "31"), ("ES", "32"), ("RJ", "33"), ("SP", "35"),
        ("PR", "41"), ("SC", "42"), ("RS", "43"), ("MS", "50"), ("MT", "51"),
        ("GO", "52"), ("DF", "53"),
    ]
    .into_iter()
    .map(|(uf, codigo)| (uf.to_string(), codigo))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producao_resolves_mapped_states() {
        let config = SefazConfig::producao();
        let url = config.endpoint(ServicoSefaz::NfeStatus, "sp").unwrap();
        assert!(url.contains("fazenda.sp.gov.br"));
        assert!(config.suporta(ServicoSefaz::NfeDistribuicao, "MG"));
        assert_eq!(config.codigo_uf("SP").unwrap(), "35");
    }

    #[test]
    fn unmapped_state_is_an_explicit_error() {
        let config = SefazConfig::producao();
        let err = config.endpoint(ServicoSefaz::CteStatus, "AM").unwrap_err();
        match err {
            SefazError::UnsupportedRegion { uf, servico } => {
                assert_eq!(uf, "AM");
                assert_eq!(servico, "CteStatusServico");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_region_code_is_an_explicit_error() {
        let config = SefazConfig::producao();
        assert!(config.codigo_uf("XX").is_err());
    }

    #[test]
    fn injected_endpoints_override_nothing_else() {
        let mut config = SefazConfig::vazia(Ambiente::Homologacao);
        config.registrar_endpoint(ServicoSefaz::NfeDistribuicao, "sp", "http://localhost:1/ws");
        assert_eq!(
            config.endpoint(ServicoSefaz::NfeDistribuicao, "SP").unwrap(),
            "http://localhost:1/ws"
        );
        assert!(config.endpoint(ServicoSefaz::NfeStatus, "SP").is_err());
        assert_eq!(config.ambiente.codigo(), 2);
    }
}
