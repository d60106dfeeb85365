//! Query Run Orchestrator
//!
//! Drives one discovery run through its state machine: PENDENTE ->
//! PROCESSANDO -> {CONCLUIDA, ERRO}. Pagination over the distribution
//! stream is strictly sequential; per-document parse and role problems
//! are absorbed into the error counter, while credential, transport,
//! envelope and persistence failures are fatal and land in
//! `mensagem_erro`.
//!
//! The page loop is written against two seams, a page source and a
//! document sink, so the traversal logic is exercised without a live
//! endpoint or a database.

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    config::db::{Connection, Pool},
    config::sefaz::SefazConfig,
    constants::CSTAT_SEM_DOCUMENTOS,
    error::{SefazError, ServiceError, ServiceResult},
    models::certificado::{operations as cert_ops, CertificadoDigital},
    models::consulta::{operations as consulta_ops, ConsultaSefaz, NovaConsulta, TipoDocumento},
    models::documento_descoberto::{
        operations as documento_ops, DocumentoDescoberto, NovoDocumentoDescoberto, PapelCnpj,
    },
    services::certificado_service,
    services::sefaz_client::SefazClient,
    services::sefaz_parser::{self, DocumentoCandidato, PaginaDistribuicao},
    utils::segredo::ChaveMestra,
};

/// Per-run ceilings, taken from the injected configuration.
#[derive(Debug, Clone, Copy)]
pub struct LimitesConsulta {
    pub max_documentos: u32,
    pub max_paginas: u32,
}

impl From<&SefazConfig> for LimitesConsulta {
    fn from(config: &SefazConfig) -> Self {
        Self {
            max_documentos: config.max_documentos_por_consulta,
            max_paginas: config.max_paginas_por_consulta,
        }
    }
}

/// Counters accumulated by one traversal of the distribution stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TotaisConsulta {
    pub encontrados: u32,
    pub erros: u32,
    pub paginas: u32,
}

/// One page of the distribution stream, keyed by the NSU cursor.
#[async_trait(?Send)]
pub trait FontePaginas {
    async fn proxima_pagina(&self, ult_nsu: u64) -> Result<PaginaDistribuicao, SefazError>;
}

/// Where classified documents land. `gravar` reports whether the row was
/// new (`false` means another run already recorded the same access key).
pub trait DestinoDocumentos {
    fn gravar(&mut self, candidato: &DocumentoCandidato, papel: PapelCnpj) -> ServiceResult<bool>;
    fn registrar_pagina(
        &mut self,
        pagina: &PaginaDistribuicao,
        novos: u32,
        erros: u32,
    ) -> ServiceResult<()>;
}

/// Walk the distribution stream page by page until end-of-stream or a
/// ceiling.
///
/// Termination: `cStat` 137 (no documents), `ultNSU >= maxNSU`, a
/// non-advancing cursor, or the page/document ceiling. A ceiling exit is a
/// normal completion with partial results, not a failure.
pub async fn percorrer_distribuicao(
    fonte: &impl FontePaginas,
    destino: &mut impl DestinoDocumentos,
    cnpj: &str,
    limites: LimitesConsulta,
) -> ServiceResult<TotaisConsulta> {
    let mut totais = TotaisConsulta::default();
    let mut cursor = 0u64;

    while totais.paginas < limites.max_paginas {
        let pagina = fonte
            .proxima_pagina(cursor)
            .await
            .map_err(ServiceError::from)?;
        totais.paginas += 1;

        let mut novos = 0u32;
        let mut erros = pagina.descartados;
        for candidato in &pagina.documentos {
            match sefaz_parser::classificar_papel(candidato, cnpj) {
                None => {
                    log::warn!(
                        "CNPJ {} plays no role in document {}",
                        cnpj,
                        candidato.chave_acesso
                    );
                    erros += 1;
                }
                Some(papel) => match destino.gravar(candidato, papel) {
                    Ok(true) => novos += 1,
                    Ok(false) => {
                        log::debug!("Access key {} already recorded", candidato.chave_acesso);
                    }
                    Err(err) => {
                        // a sink failure means documents would be lost
                        // silently; abort the run instead of counting on
                        log::error!(
                            "Failed to record document {}: {}",
                            candidato.chave_acesso,
                            err.message()
                        );
                        return Err(err);
                    }
                },
            }
        }

        totais.encontrados += novos;
        totais.erros += erros;
        destino.registrar_pagina(&pagina, novos, erros)?;

        if pagina.c_stat == CSTAT_SEM_DOCUMENTOS {
            break;
        }
        if pagina.ult_nsu >= pagina.max_nsu {
            break;
        }
        if pagina.ult_nsu <= cursor {
            // the service must advance the cursor; a stuck one would loop
            log::warn!("Distribution cursor did not advance past {}", cursor);
            break;
        }
        cursor = pagina.ult_nsu;

        if totais.encontrados >= limites.max_documentos {
            break;
        }
    }

    Ok(totais)
}

/// [`FontePaginas`] backed by the real SOAP client.
pub struct FonteDistribuicao {
    pub client: SefazClient,
    pub uf: String,
    pub cnpj: String,
}

#[async_trait(?Send)]
impl FontePaginas for FonteDistribuicao {
    async fn proxima_pagina(&self, ult_nsu: u64) -> Result<PaginaDistribuicao, SefazError> {
        self.client
            .distribuir_dfe(&self.uf, &self.cnpj, ult_nsu)
            .await
    }
}

/// Full-document retrieval by access key, tested over a scripted double.
#[async_trait(?Send)]
pub trait FonteXml {
    async fn xml_por_chave(&self, uf: &str, chave: &str) -> Result<String, SefazError>;
}

#[async_trait(?Send)]
impl FonteXml for SefazClient {
    async fn xml_por_chave(&self, uf: &str, chave: &str) -> Result<String, SefazError> {
        self.baixar_xml(uf, chave).await
    }
}

/// Fetch the signed document for one access key. The SOAP envelope is
/// stripped here; callers only ever see the `nfeProc` payload.
pub async fn obter_xml_completo(
    fonte: &impl FonteXml,
    uf: &str,
    chave: &str,
) -> Result<String, SefazError> {
    let resposta = fonte.xml_por_chave(uf, chave).await?;
    sefaz_parser::extrair_xml_consulta(&resposta)
}

/// Download the full XML of a discovered summary and persist it on the
/// row. A document whose XML is already present is returned as is.
pub async fn baixar_xml_documento(
    documento_id: i32,
    pool: &Pool,
    config: &SefazConfig,
    chave_mestra: &ChaveMestra,
) -> ServiceResult<DocumentoDescoberto> {
    let mut conn = pool.get().map_err(|e| {
        ServiceError::internal_server_error(format!("Failed to get database connection: {}", e))
    })?;

    let documento = documento_ops::find_documento_by_id(documento_id, &mut conn)?;
    if documento.xml_baixado {
        return Ok(documento);
    }

    let consulta = consulta_ops::find_consulta_by_id(documento.consulta_id, &mut conn)?;
    let certificado = cert_ops::find_certificado_by_id(consulta.certificado_id, &mut conn)?;
    verificar_certificado_utilizavel(&certificado, Utc::now().date_naive())?;

    let identidade = certificado_service::abrir_identidade(&certificado, chave_mestra)?;
    let client = SefazClient::novo(&identidade, config.clone())?;
    let xml = obter_xml_completo(&client, &consulta.uf, &documento.chave_acesso).await?;

    documento_ops::gravar_xml_baixado(documento.id, &xml, &mut conn)?;
    log::debug!(
        "Stored {} bytes of XML for document {} (chave {})",
        xml.len(),
        documento.id,
        documento.chave_acesso
    );
    documento_ops::find_documento_by_id(documento.id, &mut conn)
}

/// [`DestinoDocumentos`] backed by the database: insert-or-ignore rows,
/// additive counters and one log line per page on the run.
pub struct DestinoBanco<'a> {
    pub conn: &'a mut Connection,
    pub consulta_id: i32,
}

impl DestinoDocumentos for DestinoBanco<'_> {
    fn gravar(&mut self, candidato: &DocumentoCandidato, papel: PapelCnpj) -> ServiceResult<bool> {
        documento_ops::upsert_documento(
            candidato_para_novo(self.consulta_id, candidato, papel),
            self.conn,
        )
    }

    fn registrar_pagina(
        &mut self,
        pagina: &PaginaDistribuicao,
        novos: u32,
        erros: u32,
    ) -> ServiceResult<()> {
        consulta_ops::incrementar_totais(self.consulta_id, novos as i32, erros as i32, self.conn)?;
        consulta_ops::append_log(
            self.consulta_id,
            &format!(
                "cStat={} ultNSU={} novos={} erros={}",
                pagina.c_stat, pagina.ult_nsu, novos, erros
            ),
            self.conn,
        )?;
        Ok(())
    }
}

/// Map a parsed candidate to its persistence shape. A missing or
/// unparseable emission date falls back to the observation time.
pub fn candidato_para_novo(
    consulta_id: i32,
    candidato: &DocumentoCandidato,
    papel: PapelCnpj,
) -> NovoDocumentoDescoberto {
    NovoDocumentoDescoberto {
        consulta_id,
        chave_acesso: candidato.chave_acesso.clone(),
        numero: candidato.numero.clone(),
        serie: candidato.serie.clone(),
        data_emissao: candidato.data_emissao_utc().unwrap_or_else(Utc::now),
        papel_cnpj: papel.as_str().to_string(),
        emit_cnpj: candidato.emit_cnpj.clone(),
        emit_nome: candidato.emit_nome.clone(),
        dest_cnpj: candidato.dest_cnpj.clone(),
        dest_nome: candidato.dest_nome.clone(),
        valor_total: candidato.valor_decimal(),
        xml_completo: candidato.xml_completo.clone(),
        xml_baixado: !candidato.resumo,
    }
}

/// Certificate usability gate, checked against the stored validity window
/// before the sealed PFX is even opened.
pub fn verificar_certificado_utilizavel(
    certificado: &CertificadoDigital,
    hoje: chrono::NaiveDate,
) -> Result<(), SefazError> {
    if !certificado.ativo {
        return Err(SefazError::InvalidCertificate(format!(
            "certificate {} is deactivated",
            certificado.id
        )));
    }
    if !certificado.esta_vigente(hoje) {
        return Err(SefazError::CertificateExpired {
            inicio: certificado.validade_inicio,
            fim: certificado.validade_fim,
        });
    }
    Ok(())
}

/// Drive one run to a terminal state.
///
/// Returns the terminal row. A run-level failure (bad credential, region
/// without endpoint, transport or envelope error) is recorded as ERRO on
/// the row and is not an `Err` of this function; `Err` means the database
/// itself failed.
pub async fn executar_consulta(
    consulta_id: i32,
    pool: &Pool,
    config: &SefazConfig,
    chave_mestra: &ChaveMestra,
) -> ServiceResult<ConsultaSefaz> {
    let mut conn = pool.get().map_err(|e| {
        ServiceError::internal_server_error(format!("Failed to get database connection: {}", e))
    })?;

    let consulta = consulta_ops::marcar_processando(consulta_id, &mut conn)?;

    log::info!(
        "Run {} dispatched: tipo={} uf={} certificado={}",
        consulta.id,
        consulta.tipo_documento,
        consulta.uf,
        consulta.certificado_id
    );

    // the lookup result stays unwrapped so a missing certificate row is
    // still funneled into a terminal ERRO instead of stranding the run
    // in PROCESSANDO
    let certificado = cert_ops::find_certificado_by_id(consulta.certificado_id, &mut conn);

    let desfecho = {
        let mut destino = DestinoBanco {
            conn: &mut conn,
            consulta_id: consulta.id,
        };
        conduzir_consulta(&consulta, certificado, config, chave_mestra, &mut destino).await
    };

    match desfecho {
        Ok(totais) => {
            log::info!(
                "Run {} completed: {} found, {} errors, {} pages",
                consulta.id,
                totais.encontrados,
                totais.erros,
                totais.paginas
            );
            let terminal = consulta_ops::concluir_consulta(consulta.id, &mut conn)?;
            cert_ops::touch_ultima_consulta(consulta.certificado_id, &mut conn)?;
            Ok(terminal)
        }
        Err(err) => {
            log::error!("Run {} failed: {}", consulta.id, err.message());
            let terminal = consulta_ops::falhar_consulta(consulta.id, err.message(), &mut conn)?;
            cert_ops::touch_ultima_consulta(consulta.certificado_id, &mut conn)?;
            Ok(terminal)
        }
    }
}

/// Everything between PROCESSANDO and the terminal state. Takes the
/// certificate lookup as a result so a failed lookup flows into the same
/// failure path as an unusable credential.
async fn conduzir_consulta(
    consulta: &ConsultaSefaz,
    certificado: ServiceResult<CertificadoDigital>,
    config: &SefazConfig,
    chave_mestra: &ChaveMestra,
    destino: &mut impl DestinoDocumentos,
) -> ServiceResult<TotaisConsulta> {
    let certificado = certificado?;
    match consulta.tipo_enum() {
        Some(TipoDocumento::Nfe) => {}
        Some(outro) => {
            return Err(ServiceError::bad_request(format!(
                "Consulta de {} ainda nao implementada",
                outro
            ))
            .with_tag("consulta"));
        }
        None => {
            return Err(ServiceError::bad_request(format!(
                "Tipo de documento desconhecido: {}",
                consulta.tipo_documento
            ))
            .with_tag("consulta"));
        }
    }

    // gate on the stored window before opening any sealed material or
    // touching the network
    verificar_certificado_utilizavel(&certificado, Utc::now().date_naive())?;

    let identidade = certificado_service::abrir_identidade(&certificado, chave_mestra)?;
    let client = SefazClient::novo(&identidade, config.clone())?;
    let cnpj = certificado.cnpj.clone();
    let fonte = FonteDistribuicao {
        client,
        uf: consulta.uf.clone(),
        cnpj: cnpj.clone(),
    };
    let limites = LimitesConsulta::from(config);

    percorrer_distribuicao(&fonte, destino, &cnpj, limites).await
}

/// Create a PENDENTE run row.
pub fn criar_consulta(nova: NovaConsulta, conn: &mut Connection) -> ServiceResult<ConsultaSefaz> {
    consulta_ops::create_consulta(nova, conn)
}

/// Enqueue runs for every certificate whose automatic-query interval has
/// elapsed. The recorded period covers the trailing thirty days; the
/// distribution stream itself is cursor-driven, the dates are audit data.
pub fn enfileirar_consultas_automaticas(conn: &mut Connection) -> ServiceResult<Vec<ConsultaSefaz>> {
    let hoje = Utc::now().date_naive();
    let devidos = cert_ops::find_certificados_para_consulta_automatica(conn)?;

    let mut criadas = Vec::with_capacity(devidos.len());
    for certificado in devidos {
        let nova = NovaConsulta::pendente(
            certificado.id,
            TipoDocumento::Nfe,
            certificado.uf.clone(),
            hoje - chrono::Duration::days(30),
            hoje,
        );
        criadas.push(consulta_ops::create_consulta(nova, conn)?);
        log::info!("Enqueued automatic run for certificate {}", certificado.id);
    }
    Ok(criadas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;

    const CNPJ_CONSULTA: &str = "12345678000190";
    const CNPJ_OUTRO: &str = "98765432000155";

    fn candidato(chave: &str, emit: &str, dest: &str) -> DocumentoCandidato {
        DocumentoCandidato {
            chave_acesso: chave.to_string(),
            numero: "123".into(),
            serie: "1".into(),
            data_emissao: "2025-01-15T10:30:00-03:00".into(),
            emit_cnpj: emit.to_string(),
            emit_nome: "Vendedora Ltda".into(),
            dest_cnpj: dest.to_string(),
            dest_nome: "Compradora SA".into(),
            transp_cnpj: String::new(),
            rem_cnpj: String::new(),
            exped_cnpj: String::new(),
            receb_cnpj: String::new(),
            toma_cnpj: String::new(),
            valor_total: "1500.50".into(),
            xml_completo: "<NFe/>".into(),
            resumo: false,
        }
    }

    fn chave(n: u32) -> String {
        format!("352501123456780001905500100000012310000{:05}", n)
    }

    fn pagina(
        ult_nsu: u64,
        max_nsu: u64,
        c_stat: &str,
        documentos: Vec<DocumentoCandidato>,
        descartados: u32,
    ) -> PaginaDistribuicao {
        PaginaDistribuicao {
            c_stat: c_stat.to_string(),
            x_motivo: String::new(),
            ult_nsu,
            max_nsu,
            documentos,
            descartados,
        }
    }

    /// Hands out scripted pages in order; repeats the last one if the
    /// traversal over-asks.
    struct FonteRoteiro {
        paginas: Vec<PaginaDistribuicao>,
        chamadas: Cell<u32>,
    }

    impl FonteRoteiro {
        fn nova(paginas: Vec<PaginaDistribuicao>) -> Self {
            Self {
                paginas,
                chamadas: Cell::new(0),
            }
        }
    }

    #[async_trait(?Send)]
    impl FontePaginas for FonteRoteiro {
        async fn proxima_pagina(&self, _ult_nsu: u64) -> Result<PaginaDistribuicao, SefazError> {
            let indice = self.chamadas.get() as usize;
            self.chamadas.set(self.chamadas.get() + 1);
            let pagina = self
                .paginas
                .get(indice)
                .or_else(|| self.paginas.last())
                .cloned()
                .ok_or_else(|| SefazError::ParseError("roteiro vazio".into()))?;
            Ok(pagina)
        }
    }

    #[derive(Default)]
    struct DestinoMemoria {
        chaves: RefCell<HashSet<String>>,
        papeis: RefCell<Vec<(String, PapelCnpj)>>,
        linhas: RefCell<Vec<String>>,
    }

    impl DestinoDocumentos for &DestinoMemoria {
        fn gravar(
            &mut self,
            candidato: &DocumentoCandidato,
            papel: PapelCnpj,
        ) -> ServiceResult<bool> {
            let novo = self.chaves.borrow_mut().insert(candidato.chave_acesso.clone());
            if novo {
                self.papeis
                    .borrow_mut()
                    .push((candidato.chave_acesso.clone(), papel));
            }
            Ok(novo)
        }

        fn registrar_pagina(
            &mut self,
            pagina: &PaginaDistribuicao,
            novos: u32,
            erros: u32,
        ) -> ServiceResult<()> {
            self.linhas
                .borrow_mut()
                .push(format!("cStat={} novos={} erros={}", pagina.c_stat, novos, erros));
            Ok(())
        }
    }

    fn limites() -> LimitesConsulta {
        LimitesConsulta {
            max_documentos: 1000,
            max_paginas: 50,
        }
    }

    #[actix_rt::test]
    async fn tres_paginas_ate_o_fim_do_fluxo() {
        let fonte = FonteRoteiro::nova(vec![
            pagina(10, 30, "138", vec![candidato(&chave(1), CNPJ_CONSULTA, CNPJ_OUTRO)], 0),
            pagina(20, 30, "138", vec![candidato(&chave(2), CNPJ_CONSULTA, CNPJ_OUTRO)], 0),
            pagina(30, 30, "138", vec![candidato(&chave(3), CNPJ_CONSULTA, CNPJ_OUTRO)], 0),
        ]);
        let destino = DestinoMemoria::default();

        let totais = percorrer_distribuicao(&fonte, &mut (&destino), CNPJ_CONSULTA, limites())
            .await
            .unwrap();

        assert_eq!(fonte.chamadas.get(), 3);
        assert_eq!(totais.paginas, 3);
        assert_eq!(totais.encontrados, 3);
        assert_eq!(totais.erros, 0);
        assert_eq!(destino.linhas.borrow().len(), 3);
    }

    #[actix_rt::test]
    async fn cstat_137_encerra_na_primeira_pagina() {
        let fonte = FonteRoteiro::nova(vec![pagina(0, 0, "137", vec![], 0)]);
        let destino = DestinoMemoria::default();

        let totais = percorrer_distribuicao(&fonte, &mut (&destino), CNPJ_CONSULTA, limites())
            .await
            .unwrap();

        assert_eq!(fonte.chamadas.get(), 1);
        assert_eq!(totais.encontrados, 0);
        assert_eq!(totais.erros, 0);
    }

    #[actix_rt::test]
    async fn dois_documentos_com_papeis_distintos() {
        let fonte = FonteRoteiro::nova(vec![pagina(
            2,
            2,
            "138",
            vec![
                candidato(&chave(1), CNPJ_CONSULTA, CNPJ_OUTRO),
                candidato(&chave(2), CNPJ_OUTRO, CNPJ_CONSULTA),
            ],
            0,
        )]);
        let destino = DestinoMemoria::default();

        let totais = percorrer_distribuicao(&fonte, &mut (&destino), CNPJ_CONSULTA, limites())
            .await
            .unwrap();

        assert_eq!(totais.encontrados, 2);
        assert_eq!(totais.erros, 0);
        let papeis = destino.papeis.borrow();
        assert_eq!(papeis[0].1, PapelCnpj::Emitente);
        assert_eq!(papeis[1].1, PapelCnpj::Destinatario);
    }

    #[actix_rt::test]
    async fn chave_repetida_entre_corridas_nao_conta_de_novo() {
        let destino = DestinoMemoria::default();

        let primeira = FonteRoteiro::nova(vec![pagina(
            1,
            1,
            "138",
            vec![candidato(&chave(1), CNPJ_CONSULTA, CNPJ_OUTRO)],
            0,
        )]);
        let totais = percorrer_distribuicao(&primeira, &mut (&destino), CNPJ_CONSULTA, limites())
            .await
            .unwrap();
        assert_eq!(totais.encontrados, 1);

        // a second run observes the same document plus a new one
        let segunda = FonteRoteiro::nova(vec![pagina(
            2,
            2,
            "138",
            vec![
                candidato(&chave(1), CNPJ_CONSULTA, CNPJ_OUTRO),
                candidato(&chave(2), CNPJ_CONSULTA, CNPJ_OUTRO),
            ],
            0,
        )]);
        let totais = percorrer_distribuicao(&segunda, &mut (&destino), CNPJ_CONSULTA, limites())
            .await
            .unwrap();

        assert_eq!(totais.encontrados, 1);
        assert_eq!(totais.erros, 0);
        assert_eq!(destino.chaves.borrow().len(), 2);
    }

    #[actix_rt::test]
    async fn descartados_e_sem_papel_entram_no_contador_de_erros() {
        // nine good documents plus one already counted as discarded by the
        // parser, plus one where the queried CNPJ plays no role
        let mut docs: Vec<_> = (1..=9)
            .map(|n| candidato(&chave(n), CNPJ_CONSULTA, CNPJ_OUTRO))
            .collect();
        docs.push(candidato(&chave(10), CNPJ_OUTRO, CNPJ_OUTRO));

        let fonte = FonteRoteiro::nova(vec![pagina(11, 11, "138", docs, 1)]);
        let destino = DestinoMemoria::default();

        let totais = percorrer_distribuicao(&fonte, &mut (&destino), CNPJ_CONSULTA, limites())
            .await
            .unwrap();

        assert_eq!(totais.encontrados, 9);
        assert_eq!(totais.erros, 2);
    }

    #[actix_rt::test]
    async fn teto_de_paginas_encerra_com_resultado_parcial() {
        // the source always advances, the ceiling must stop the loop
        let paginas: Vec<_> = (1..=10)
            .map(|n| {
                pagina(
                    n * 10,
                    1000,
                    "138",
                    vec![candidato(&chave(n as u32), CNPJ_CONSULTA, CNPJ_OUTRO)],
                    0,
                )
            })
            .collect();
        let fonte = FonteRoteiro::nova(paginas);
        let destino = DestinoMemoria::default();

        let totais = percorrer_distribuicao(
            &fonte,
            &mut (&destino),
            CNPJ_CONSULTA,
            LimitesConsulta {
                max_documentos: 1000,
                max_paginas: 2,
            },
        )
        .await
        .unwrap();

        assert_eq!(fonte.chamadas.get(), 2);
        assert_eq!(totais.encontrados, 2);
    }

    #[actix_rt::test]
    async fn teto_de_documentos_encerra_com_resultado_parcial() {
        let paginas: Vec<_> = (1..=10)
            .map(|n| {
                pagina(
                    n * 10,
                    1000,
                    "138",
                    vec![
                        candidato(&chave(n as u32 * 2), CNPJ_CONSULTA, CNPJ_OUTRO),
                        candidato(&chave(n as u32 * 2 + 1), CNPJ_CONSULTA, CNPJ_OUTRO),
                    ],
                    0,
                )
            })
            .collect();
        let fonte = FonteRoteiro::nova(paginas);
        let destino = DestinoMemoria::default();

        let totais = percorrer_distribuicao(
            &fonte,
            &mut (&destino),
            CNPJ_CONSULTA,
            LimitesConsulta {
                max_documentos: 3,
                max_paginas: 50,
            },
        )
        .await
        .unwrap();

        assert_eq!(fonte.chamadas.get(), 2);
        assert_eq!(totais.encontrados, 4);
    }

    #[actix_rt::test]
    async fn cursor_travado_nao_gera_laco_infinito() {
        let fonte = FonteRoteiro::nova(vec![pagina(5, 1000, "138", vec![], 0)]);
        let destino = DestinoMemoria::default();

        let totais = percorrer_distribuicao(&fonte, &mut (&destino), CNPJ_CONSULTA, limites())
            .await
            .unwrap();

        // first page advances 0 -> 5, the repeated page does not advance
        assert_eq!(fonte.chamadas.get(), 2);
        assert_eq!(totais.paginas, 2);
    }

    #[actix_rt::test]
    async fn falha_de_transporte_aborta_a_travessia() {
        struct FonteQuebrada;

        #[async_trait(?Send)]
        impl FontePaginas for FonteQuebrada {
            async fn proxima_pagina(
                &self,
                _ult_nsu: u64,
            ) -> Result<PaginaDistribuicao, SefazError> {
                Err(SefazError::UpstreamError { status: 503 })
            }
        }

        let destino = DestinoMemoria::default();
        let erro = percorrer_distribuicao(&FonteQuebrada, &mut (&destino), CNPJ_CONSULTA, limites())
            .await
            .unwrap_err();
        assert!(erro.message().contains("503"));
    }

    #[actix_rt::test]
    async fn falha_ao_gravar_aborta_a_corrida() {
        struct DestinoFalho;

        impl DestinoDocumentos for DestinoFalho {
            fn gravar(
                &mut self,
                _candidato: &DocumentoCandidato,
                _papel: PapelCnpj,
            ) -> ServiceResult<bool> {
                Err(ServiceError::internal_server_error(
                    "connection reset by peer",
                ))
            }

            fn registrar_pagina(
                &mut self,
                _pagina: &PaginaDistribuicao,
                _novos: u32,
                _erros: u32,
            ) -> ServiceResult<()> {
                Ok(())
            }
        }

        let fonte = FonteRoteiro::nova(vec![pagina(
            1,
            1,
            "138",
            vec![candidato(&chave(1), CNPJ_CONSULTA, CNPJ_OUTRO)],
            0,
        )]);

        // a sink that cannot persist must fail the run, not let it finish
        // CONCLUIDA with the document silently dropped
        let erro = percorrer_distribuicao(&fonte, &mut DestinoFalho, CNPJ_CONSULTA, limites())
            .await
            .unwrap_err();
        assert!(erro.message().contains("connection reset"));
    }

    fn consulta_processando() -> ConsultaSefaz {
        use chrono::{NaiveDate, TimeZone};
        let agora = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        ConsultaSefaz {
            id: 7,
            certificado_id: 99,
            tipo_documento: "NFE".into(),
            uf: "SP".into(),
            data_inicio: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            data_fim: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            status: "PROCESSANDO".into(),
            total_encontrados: 0,
            total_importados: 0,
            total_erros: 0,
            mensagem_erro: String::new(),
            log_detalhado: String::new(),
            data_consulta: agora,
            data_conclusao: None,
        }
    }

    #[actix_rt::test]
    async fn certificado_inexistente_falha_a_corrida_sem_tocar_o_destino() {
        let consulta = consulta_processando();
        let destino = DestinoMemoria::default();
        let chave_mestra = ChaveMestra::from_bytes([0u8; 32]);

        // the lookup failure must surface through the run failure path so
        // the row reaches ERRO instead of staying PROCESSANDO forever
        let erro = conduzir_consulta(
            &consulta,
            Err(ServiceError::not_found("Certificate with id 99 not found")),
            &SefazConfig::vazia(crate::config::sefaz::Ambiente::Producao),
            &chave_mestra,
            &mut (&destino),
        )
        .await
        .unwrap_err();

        assert!(erro.message().contains("99"));
        assert!(destino.chaves.borrow().is_empty());
        assert!(destino.linhas.borrow().is_empty());
    }

    #[actix_rt::test]
    async fn download_extrai_o_documento_do_envelope() {
        struct FonteXmlRoteiro {
            resposta: String,
        }

        #[async_trait(?Send)]
        impl FonteXml for FonteXmlRoteiro {
            async fn xml_por_chave(&self, _uf: &str, _chave: &str) -> Result<String, SefazError> {
                Ok(self.resposta.clone())
            }
        }

        let nfe_proc = format!(
            r#"<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe"><NFe><infNFe Id="NFe{}"/></NFe></nfeProc>"#,
            chave(1)
        );
        let fonte = FonteXmlRoteiro {
            resposta: format!(
                r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body>
<retConsSitNFe xmlns="http://www.portalfiscal.inf.br/nfe"><cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo>{}</retConsSitNFe>
</soap:Body></soap:Envelope>"#,
                nfe_proc
            ),
        };

        let xml = obter_xml_completo(&fonte, "SP", &chave(1)).await.unwrap();
        assert_eq!(xml, nfe_proc);
    }

    #[actix_rt::test]
    async fn download_indisponivel_nao_devolve_envelope_cru() {
        struct FonteXmlNegado;

        #[async_trait(?Send)]
        impl FonteXml for FonteXmlNegado {
            async fn xml_por_chave(&self, _uf: &str, _chave: &str) -> Result<String, SefazError> {
                Ok(r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body>
<retConsSitNFe xmlns="http://www.portalfiscal.inf.br/nfe"><cStat>217</cStat><xMotivo>NF-e nao consta na base</xMotivo></retConsSitNFe>
</soap:Body></soap:Envelope>"#
                    .to_string())
            }
        }

        assert!(matches!(
            obter_xml_completo(&FonteXmlNegado, "SP", &chave(1)).await,
            Err(SefazError::ParseError(_))
        ));
    }

    #[test]
    fn certificado_fora_da_janela_e_rejeitado_antes_da_rede() {
        use chrono::{NaiveDate, TimeZone};

        let agora = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let certificado = CertificadoDigital {
            id: 1,
            tenant_id: "t1".into(),
            nome: "Matriz".into(),
            cnpj: CNPJ_CONSULTA.into(),
            uf: "SP".into(),
            arquivo_pfx: vec![],
            senha_pfx: vec![],
            validade_inicio: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            validade_fim: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            emissor: "AC Teste".into(),
            ativo: true,
            consulta_automatica: false,
            intervalo_consulta: 60,
            ultima_consulta: None,
            created_at: agora,
            updated_at: agora,
        };

        assert!(matches!(
            verificar_certificado_utilizavel(&certificado, agora.date_naive()),
            Err(SefazError::CertificateExpired { .. })
        ));

        let mut desativado = certificado.clone();
        desativado.ativo = false;
        desativado.validade_fim = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        assert!(matches!(
            verificar_certificado_utilizavel(&desativado, agora.date_naive()),
            Err(SefazError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn conversao_para_linha_persistida() {
        let doc = candidato(&chave(1), CNPJ_CONSULTA, CNPJ_OUTRO);
        let novo = candidato_para_novo(7, &doc, PapelCnpj::Emitente);

        assert_eq!(novo.consulta_id, 7);
        assert_eq!(novo.papel_cnpj, "EMITENTE");
        assert!(novo.xml_baixado);
        assert_eq!(novo.valor_total.to_string(), "1500.50");

        let mut resumo = doc;
        resumo.resumo = true;
        let novo = candidato_para_novo(7, &resumo, PapelCnpj::Destinatario);
        assert!(!novo.xml_baixado);
    }
}
