//! SEFAZ Response Parser
//!
//! Decodes the two XML layers of a distribution response: the SOAP
//! envelope carrying `retDistDFeInt` (status, NSU cursor, `docZip` batch)
//! and, inside each base64 entry, the fiscal document itself. The stream
//! interleaves full `procNFe` payloads and `resNFe` summaries; both map
//! to the same candidate shape.
//!
//! Envelope failures are fatal to the call; a single bad `docZip` entry
//! or unparseable document is skipped and counted so the batch survives.

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use roxmltree::{Document, Node};
use rust_decimal::Decimal;

use crate::constants::{
    CHAVE_ACESSO_TAMANHO, CSTAT_USO_AUTORIZADO, NS_CTE, NS_NFE, PREFIXO_CHAVE_CTE,
    PREFIXO_CHAVE_NFE,
};
use crate::error::SefazError;
use crate::models::documento_descoberto::PapelCnpj;

/// One decoded page of the distribution stream.
#[derive(Debug, Clone)]
pub struct PaginaDistribuicao {
    pub c_stat: String,
    pub x_motivo: String,
    pub ult_nsu: u64,
    pub max_nsu: u64,
    pub documentos: Vec<DocumentoCandidato>,
    /// docZip entries that failed decoding or carried an unparseable document.
    pub descartados: u32,
}

/// A fiscal document extracted from the stream, before role classification
/// and persistence. CNPJ fields are empty strings when the party is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentoCandidato {
    pub chave_acesso: String,
    pub numero: String,
    pub serie: String,
    /// Raw `dhEmi` text (RFC 3339 with offset in the national schema).
    pub data_emissao: String,
    pub emit_cnpj: String,
    pub emit_nome: String,
    pub dest_cnpj: String,
    pub dest_nome: String,
    pub transp_cnpj: String,
    pub rem_cnpj: String,
    pub exped_cnpj: String,
    pub receb_cnpj: String,
    pub toma_cnpj: String,
    /// Raw `vNF` text, `"0"` when the total is absent.
    pub valor_total: String,
    pub xml_completo: String,
    /// True for `resNFe` summary entries, which carry no item detail.
    pub resumo: bool,
}

impl DocumentoCandidato {
    pub fn valor_decimal(&self) -> Decimal {
        self.valor_total.trim().parse().unwrap_or(Decimal::ZERO)
    }

    pub fn data_emissao_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::parse_from_rfc3339(self.data_emissao.trim())
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}

/// Parse a full distribution SOAP response into one page.
pub fn parsear_resposta_distribuicao(xml: &str) -> Result<PaginaDistribuicao, SefazError> {
    let doc = Document::parse(xml)
        .map_err(|err| SefazError::ParseError(format!("undecodable envelope: {}", err)))?;

    let ret = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "retDistDFeInt")
        .ok_or_else(|| SefazError::ParseError("response has no retDistDFeInt".into()))?;

    let c_stat = filho_texto(ret, "cStat")
        .ok_or_else(|| SefazError::ParseError("retDistDFeInt has no cStat".into()))?
        .trim()
        .to_string();
    let x_motivo = filho_texto(ret, "xMotivo").unwrap_or_default().trim().to_string();
    let ult_nsu = nsu(ret, "ultNSU");
    let max_nsu = nsu(ret, "maxNSU");

    let mut documentos = Vec::new();
    let mut descartados = 0u32;
    for entrada in ret
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "docZip")
    {
        let Some(texto) = entrada.text() else {
            descartados += 1;
            continue;
        };
        match decodificar_doc_zip(texto) {
            Some(xml_doc) => match extrair_documento(&xml_doc) {
                Some(candidato) => documentos.push(candidato),
                None => {
                    let nsu = entrada.attribute("NSU").unwrap_or("?");
                    log::warn!("Skipping unparseable document at NSU {}", nsu);
                    descartados += 1;
                }
            },
            None => {
                let nsu = entrada.attribute("NSU").unwrap_or("?");
                log::warn!("Skipping undecodable docZip at NSU {}", nsu);
                descartados += 1;
            }
        }
    }

    Ok(PaginaDistribuicao {
        c_stat,
        x_motivo,
        ult_nsu,
        max_nsu,
        documentos,
        descartados,
    })
}

/// Extract the signed fiscal document out of a `consSitNFe` response.
///
/// The download only succeeds when the protocol reports the document as
/// authorized (`cStat` 100) and the response embeds the full `nfeProc`;
/// the returned string is that element alone, not the SOAP envelope.
pub fn extrair_xml_consulta(xml: &str) -> Result<String, SefazError> {
    let doc = Document::parse(xml)
        .map_err(|err| SefazError::ParseError(format!("undecodable envelope: {}", err)))?;

    let ret = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "retConsSitNFe")
        .ok_or_else(|| SefazError::ParseError("response has no retConsSitNFe".into()))?;

    let c_stat = filho_texto(ret, "cStat")
        .ok_or_else(|| SefazError::ParseError("retConsSitNFe has no cStat".into()))?
        .trim();
    if c_stat != CSTAT_USO_AUTORIZADO {
        let x_motivo = filho_texto(ret, "xMotivo").unwrap_or_default().trim().to_string();
        return Err(SefazError::ParseError(format!(
            "document not available for download (cStat {}: {})",
            c_stat, x_motivo
        )));
    }

    let proc = doc
        .descendants()
        .find(|n| n.has_tag_name((NS_NFE, "nfeProc")))
        .ok_or_else(|| SefazError::ParseError("response carries no nfeProc document".into()))?;

    Ok(xml[proc.range()].to_string())
}

/// base64-decode a docZip entry into XML text, inflating when the payload
/// carries the gzip magic bytes.
pub fn decodificar_doc_zip(texto: &str) -> Option<String> {
    let limpo: String = texto.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64.decode(limpo).ok()?;

    let bytes = if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut inflado = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut inflado)
            .ok()?;
        inflado
    } else {
        bytes
    };

    String::from_utf8(bytes).ok()
}

/// Extract one candidate from a decoded fiscal-document XML. `None` means
/// the document is unparseable or of an unknown shape.
pub fn extrair_documento(xml: &str) -> Option<DocumentoCandidato> {
    let doc = Document::parse(xml).ok()?;

    if let Some(inf_nfe) = doc
        .descendants()
        .find(|n| n.has_tag_name((NS_NFE, "infNFe")))
    {
        return extrair_nfe_completa(inf_nfe, xml);
    }
    if let Some(res_nfe) = doc
        .descendants()
        .find(|n| n.has_tag_name((NS_NFE, "resNFe")))
    {
        return extrair_resumo_nfe(res_nfe, xml);
    }
    if let Some(inf_cte) = doc
        .descendants()
        .find(|n| n.has_tag_name((NS_CTE, "infCte")))
    {
        return extrair_cte(inf_cte, xml);
    }
    None
}

fn extrair_nfe_completa(inf_nfe: Node, xml: &str) -> Option<DocumentoCandidato> {
    let chave = chave_valida(inf_nfe.attribute("Id")?, PREFIXO_CHAVE_NFE)?;

    let ide = filho_ns(inf_nfe, NS_NFE, "ide");
    let emit = filho_ns(inf_nfe, NS_NFE, "emit");
    let dest = filho_ns(inf_nfe, NS_NFE, "dest");
    let transp = filho_ns(inf_nfe, NS_NFE, "transp");
    let icms_tot = filho_ns(inf_nfe, NS_NFE, "total")
        .and_then(|t| filho_ns(t, NS_NFE, "ICMSTot"));

    Some(DocumentoCandidato {
        chave_acesso: chave,
        numero: texto_ns(ide, NS_NFE, "nNF"),
        serie: texto_ns(ide, NS_NFE, "serie"),
        data_emissao: texto_ns(ide, NS_NFE, "dhEmi"),
        emit_cnpj: texto_ns(emit, NS_NFE, "CNPJ"),
        emit_nome: texto_ns(emit, NS_NFE, "xNome"),
        dest_cnpj: {
            let cnpj = texto_ns(dest, NS_NFE, "CNPJ");
            if cnpj.is_empty() {
                texto_ns(dest, NS_NFE, "CPF")
            } else {
                cnpj
            }
        },
        dest_nome: texto_ns(dest, NS_NFE, "xNome"),
        transp_cnpj: transp
            .and_then(|t| filho_ns(t, NS_NFE, "transporta"))
            .map(|tr| texto_ns(Some(tr), NS_NFE, "CNPJ"))
            .unwrap_or_default(),
        rem_cnpj: String::new(),
        exped_cnpj: String::new(),
        receb_cnpj: String::new(),
        toma_cnpj: String::new(),
        valor_total: {
            let v = texto_ns(icms_tot, NS_NFE, "vNF");
            if v.is_empty() {
                "0".to_string()
            } else {
                v
            }
        },
        xml_completo: xml.to_string(),
        resumo: false,
    })
}

fn extrair_resumo_nfe(res_nfe: Node, xml: &str) -> Option<DocumentoCandidato> {
    let chave = chave_valida(&texto_ns(Some(res_nfe), NS_NFE, "chNFe"), "")?;

    // resNFe carries no ide block; numero and serie live inside the key
    // (positions 22..25 and 25..34).
    let serie = sem_zeros_a_esquerda(&chave[22..25]);
    let numero = sem_zeros_a_esquerda(&chave[25..34]);

    Some(DocumentoCandidato {
        chave_acesso: chave,
        numero,
        serie,
        data_emissao: texto_ns(Some(res_nfe), NS_NFE, "dhEmi"),
        emit_cnpj: texto_ns(Some(res_nfe), NS_NFE, "CNPJ"),
        emit_nome: texto_ns(Some(res_nfe), NS_NFE, "xNome"),
        dest_cnpj: String::new(),
        dest_nome: String::new(),
        transp_cnpj: String::new(),
        rem_cnpj: String::new(),
        exped_cnpj: String::new(),
        receb_cnpj: String::new(),
        toma_cnpj: String::new(),
        valor_total: {
            let v = texto_ns(Some(res_nfe), NS_NFE, "vNF");
            if v.is_empty() {
                "0".to_string()
            } else {
                v
            }
        },
        xml_completo: xml.to_string(),
        resumo: true,
    })
}

fn extrair_cte(inf_cte: Node, xml: &str) -> Option<DocumentoCandidato> {
    let chave = chave_valida(inf_cte.attribute("Id")?, PREFIXO_CHAVE_CTE)?;

    let ide = filho_ns(inf_cte, NS_CTE, "ide");
    let emit = filho_ns(inf_cte, NS_CTE, "emit");
    let rem = filho_ns(inf_cte, NS_CTE, "rem");
    let exped = filho_ns(inf_cte, NS_CTE, "exped");
    let receb = filho_ns(inf_cte, NS_CTE, "receb");
    let dest = filho_ns(inf_cte, NS_CTE, "dest");
    let toma = inf_cte
        .descendants()
        .find(|n| n.has_tag_name((NS_CTE, "toma4")));

    Some(DocumentoCandidato {
        chave_acesso: chave,
        numero: texto_ns(ide, NS_CTE, "nCT"),
        serie: texto_ns(ide, NS_CTE, "serie"),
        data_emissao: texto_ns(ide, NS_CTE, "dhEmi"),
        emit_cnpj: texto_ns(emit, NS_CTE, "CNPJ"),
        emit_nome: texto_ns(emit, NS_CTE, "xNome"),
        dest_cnpj: texto_ns(dest, NS_CTE, "CNPJ"),
        dest_nome: texto_ns(dest, NS_CTE, "xNome"),
        transp_cnpj: String::new(),
        rem_cnpj: texto_ns(rem, NS_CTE, "CNPJ"),
        exped_cnpj: texto_ns(exped, NS_CTE, "CNPJ"),
        receb_cnpj: texto_ns(receb, NS_CTE, "CNPJ"),
        toma_cnpj: toma.map(|t| texto_ns(Some(t), NS_CTE, "CNPJ")).unwrap_or_default(),
        valor_total: {
            let v = texto_ns(Some(inf_cte), NS_CTE, "vTPrest");
            if v.is_empty() {
                "0".to_string()
            } else {
                v
            }
        },
        xml_completo: xml.to_string(),
        resumo: false,
    })
}

/// Which role the given CNPJ plays in the document. First match wins, in
/// issuer-to-taker order; `None` when it appears nowhere.
pub fn classificar_papel(doc: &DocumentoCandidato, cnpj: &str) -> Option<PapelCnpj> {
    let alvo = somente_digitos(cnpj);
    if alvo.is_empty() {
        return None;
    }
    let casa = |campo: &str| !campo.is_empty() && somente_digitos(campo) == alvo;

    if casa(&doc.emit_cnpj) {
        Some(PapelCnpj::Emitente)
    } else if casa(&doc.dest_cnpj) {
        Some(PapelCnpj::Destinatario)
    } else if casa(&doc.transp_cnpj) {
        Some(PapelCnpj::Transportador)
    } else if casa(&doc.rem_cnpj) {
        Some(PapelCnpj::Remetente)
    } else if casa(&doc.exped_cnpj) {
        Some(PapelCnpj::Expedidor)
    } else if casa(&doc.receb_cnpj) {
        Some(PapelCnpj::Recebedor)
    } else if casa(&doc.toma_cnpj) {
        Some(PapelCnpj::Tomador)
    } else {
        None
    }
}

fn somente_digitos(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

// an all-zero field must stay "0", not become empty
fn sem_zeros_a_esquerda(campo: &str) -> String {
    let aparado = campo.trim_start_matches('0');
    if aparado.is_empty() {
        "0".to_string()
    } else {
        aparado.to_string()
    }
}

fn chave_valida(id: &str, prefixo: &str) -> Option<String> {
    let chave = if prefixo.is_empty() {
        id.trim()
    } else {
        id.trim().strip_prefix(prefixo).unwrap_or(id.trim())
    };
    if chave.len() == CHAVE_ACESSO_TAMANHO && chave.chars().all(|c| c.is_ascii_digit()) {
        Some(chave.to_string())
    } else {
        None
    }
}

fn filho_texto<'a>(no: Node<'a, 'a>, nome: &str) -> Option<&'a str> {
    no.children()
        .find(|n| n.is_element() && n.tag_name().name() == nome)
        .and_then(|n| n.text())
}

fn nsu(ret: Node, nome: &str) -> u64 {
    filho_texto(ret, nome)
        .and_then(|t| t.trim().parse().ok())
        .unwrap_or(0)
}

fn filho_ns<'a>(no: Node<'a, 'a>, ns: &str, nome: &str) -> Option<Node<'a, 'a>> {
    no.children().find(|n| n.has_tag_name((ns, nome)))
}

fn texto_ns(no: Option<Node>, ns: &str, nome: &str) -> String {
    no.and_then(|pai| {
        pai.descendants()
            .find(|n| n.has_tag_name((ns, nome)))
            .and_then(|n| n.text())
    })
    .unwrap_or("")
    .trim()
    .to_string()
}
