//! Shared constants: wire-level values for the SEFAZ webservices and
//! user-facing messages.

// XML namespaces of the national fiscal-document schemas
pub const NS_NFE: &str = "http://www.portalfiscal.inf.br/nfe";
pub const NS_CTE: &str = "http://www.portalfiscal.inf.br/cte";

// SOAP transport
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";
pub const VERSAO_DIST_DFE: &str = "1.01";
pub const VERSAO_CONS_SIT: &str = "4.00";

// The distribution cursor (NSU) is always serialized as a 15-digit,
// zero-padded decimal.
pub const NSU_LARGURA: usize = 15;

// Response codes of the distDFeInt service
pub const CSTAT_SEM_DOCUMENTOS: &str = "137";
pub const CSTAT_DOCUMENTOS_LOCALIZADOS: &str = "138";

// Response code of the consSitNFe service for an authorized document
pub const CSTAT_USO_AUTORIZADO: &str = "100";

// Access keys are 44 digits; the `Id` attribute carries a model prefix.
pub const CHAVE_ACESSO_TAMANHO: usize = 44;
pub const PREFIXO_CHAVE_NFE: &str = "NFe";
pub const PREFIXO_CHAVE_CTE: &str = "CTe";

// Per-run ceilings (overridable through SefazConfig)
pub const MAX_DOCUMENTOS_PADRAO: u32 = 1000;
pub const MAX_PAGINAS_PADRAO: u32 = 50;

// Request timeouts, seconds. Status/download calls answer fast; the
// distribution service streams batches and needs more headroom.
pub const TIMEOUT_STATUS_SEGUNDOS: u64 = 30;
pub const TIMEOUT_DISTRIBUICAO_SEGUNDOS: u64 = 60;

// Environment variables
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_MASTER_KEY: &str = "DFEHUB_MASTER_KEY";
pub const ENV_SEFAZ_AMBIENTE: &str = "SEFAZ_AMBIENTE";
pub const ENV_INTERVALO_DISPATCHER: &str = "DFEHUB_INTERVALO_SEGUNDOS";

// Messages
pub const MESSAGE_CONSULTA_NAO_PENDENTE: &str = "Query run is not in PENDENTE state";
pub const MESSAGE_CONSULTA_NAO_PROCESSANDO: &str = "Query run is not in PROCESSANDO state";
pub const MESSAGE_DOCUMENTO_JA_IMPORTADO: &str = "Document was already imported";
