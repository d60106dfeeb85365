//! Import Service
//!
//! The explicit step that turns a discovered document into the
//! authoritative business record (`nfe_documents` + `nfe_itens`). The item
//! list, protocol and product totals come out of the stored XML; the
//! header fields were already structured at discovery time. The whole step
//! runs in one transaction so a half-imported document cannot exist.

use chrono::Utc;
use roxmltree::Document;
use rust_decimal::Decimal;

use crate::{
    config::db::Pool,
    constants::{MESSAGE_DOCUMENTO_JA_IMPORTADO, NS_NFE},
    error::{ServiceError, ServiceResult},
    models::consulta::operations as consulta_ops,
    models::documento_descoberto::operations as documento_ops,
    models::nfe_document::{
        operations as nfe_ops, validators as nfe_validators, NewNfeDocument, NewNfeItem,
        NfeDocument,
    },
    services::functional_patterns::{run_query, QueryReader},
};

/// One `det` line of the fiscal document.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemNota {
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

/// Extract the item lines (`det/prod`) of a full NFe XML. Unparseable XML
/// or an item-less document yields an empty list; items are never a reason
/// to abort an import.
pub fn extrair_itens(xml: &str) -> Vec<ItemNota> {
    let Ok(doc) = Document::parse(xml) else {
        return Vec::new();
    };

    doc.descendants()
        .filter(|n| n.has_tag_name((NS_NFE, "det")))
        .enumerate()
        .filter_map(|(indice, det)| {
            let prod = det
                .children()
                .find(|n| n.has_tag_name((NS_NFE, "prod")))?;
            let campo = |nome: &str| {
                prod.children()
                    .find(|n| n.has_tag_name((NS_NFE, nome)))
                    .and_then(|n| n.text())
                    .unwrap_or("")
                    .trim()
                    .to_string()
            };
            let numero_item = det
                .attribute("nItem")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(indice as i32 + 1);

            Some(ItemNota {
                numero_item,
                codigo_produto: campo("cProd"),
                descricao: campo("xProd"),
                ncm: campo("NCM"),
                cfop: campo("CFOP"),
                unidade: campo("uCom"),
                quantidade: decimal(&campo("qCom")),
                valor_unitario: decimal(&campo("vUnCom")),
                valor_total: decimal(&campo("vProd")),
            })
        })
        .collect()
}

/// Authorization data from `protNFe/infProt`: (`cStat`, `nProt`). Both
/// empty when the stored XML carries no protocol.
pub fn extrair_protocolo(xml: &str) -> (String, String) {
    let Ok(doc) = Document::parse(xml) else {
        return (String::new(), String::new());
    };
    let Some(inf_prot) = doc
        .descendants()
        .find(|n| n.has_tag_name((NS_NFE, "infProt")))
    else {
        return (String::new(), String::new());
    };
    let texto = |nome: &str| {
        inf_prot
            .descendants()
            .find(|n| n.has_tag_name((NS_NFE, nome)))
            .and_then(|n| n.text())
            .unwrap_or("")
            .trim()
            .to_string()
    };
    (texto("cStat"), texto("nProt"))
}

/// Product total (`ICMSTot/vProd`), zero when absent.
pub fn extrair_valor_produtos(xml: &str) -> Decimal {
    let Ok(doc) = Document::parse(xml) else {
        return Decimal::ZERO;
    };
    doc.descendants()
        .find(|n| n.has_tag_name((NS_NFE, "ICMSTot")))
        .and_then(|tot| {
            tot.children()
                .find(|n| n.has_tag_name((NS_NFE, "vProd")))
                .and_then(|n| n.text())
        })
        .map(|v| decimal(v))
        .unwrap_or(Decimal::ZERO)
}

fn decimal(texto: &str) -> Decimal {
    texto.trim().parse().unwrap_or(Decimal::ZERO)
}

/// Transactional import of one discovered document.
///
/// Fails with `conflict` when the document was already imported (or when
/// the access key already exists in `nfe_documents`), with `bad_request`
/// when only a summary without the full XML was discovered.
pub fn importar_documento_reader(
    documento_id: i32,
    tenant_id: String,
) -> QueryReader<NfeDocument> {
    QueryReader::new(move |conn| {
        let documento = documento_ops::find_documento_by_id(documento_id, conn)?;
        if documento.importado {
            return Err(ServiceError::conflict(MESSAGE_DOCUMENTO_JA_IMPORTADO)
                .with_tag("importacao"));
        }
        if !documento.xml_baixado {
            return Err(ServiceError::bad_request(format!(
                "Documento {} tem apenas o resumo; baixe o XML completo antes de importar",
                documento.chave_acesso
            ))
            .with_tag("importacao"));
        }

        let (status_nfe, protocolo) = extrair_protocolo(&documento.xml_completo);
        let novo = NewNfeDocument {
            tenant_id: tenant_id.clone(),
            chave_acesso: documento.chave_acesso.clone(),
            numero: documento.numero.clone(),
            serie: documento.serie.clone(),
            data_emissao: documento.data_emissao,
            emit_cnpj: documento.emit_cnpj.clone(),
            emit_nome: documento.emit_nome.clone(),
            dest_cnpj: documento.dest_cnpj.clone(),
            dest_nome: documento.dest_nome.clone(),
            valor_total: documento.valor_total,
            valor_produtos: extrair_valor_produtos(&documento.xml_completo),
            status_nfe,
            protocolo,
            xml_content: documento.xml_completo.clone(),
            data_importacao: Utc::now(),
        };
        nfe_validators::validate_new_nfe(&novo)?;

        let nfe = nfe_ops::create_nfe_document(novo, conn)?;

        let itens: Vec<NewNfeItem> = extrair_itens(&documento.xml_completo)
            .into_iter()
            .map(|item| NewNfeItem {
                nfe_id: nfe.id,
                numero_item: item.numero_item,
                codigo_produto: item.codigo_produto,
                descricao: item.descricao,
                ncm: item.ncm,
                cfop: item.cfop,
                unidade: item.unidade,
                quantidade: item.quantidade,
                valor_unitario: item.valor_unitario,
                valor_total: item.valor_total,
            })
            .collect();
        if !itens.is_empty() {
            nfe_ops::insert_nfe_itens(itens, conn)?;
        }

        documento_ops::marcar_importado(documento.id, conn)?;
        consulta_ops::incrementar_importados(documento.consulta_id, 1, conn)?;

        log::info!(
            "Imported document {} as NFe {}",
            documento.chave_acesso,
            nfe.id
        );
        Ok(nfe)
    })
    .transaction()
}

pub fn importar_documento(
    documento_id: i32,
    tenant_id: String,
    pool: &Pool,
) -> ServiceResult<NfeDocument> {
    run_query(importar_documento_reader(documento_id, tenant_id), pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAVE: &str = "35250112345678000190550010000001231000001234";

    fn nfe_com_itens() -> String {
        format!(
            r#"<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe">
  <NFe><infNFe Id="NFe{CHAVE}" versao="4.00">
    <ide><nNF>123</nNF><serie>1</serie></ide>
    <emit><CNPJ>12345678000190</CNPJ><xNome>Vendedora Ltda</xNome></emit>
    <det nItem="1">
      <prod><cProd>SKU-001</cProd><xProd>Parafuso sextavado</xProd><NCM>73181500</NCM>
        <CFOP>5102</CFOP><uCom>UN</uCom><qCom>100.0000</qCom>
        <vUnCom>0.5000000000</vUnCom><vProd>50.00</vProd></prod>
    </det>
    <det nItem="2">
      <prod><cProd>SKU-002</cProd><xProd>Porca M8</xProd><NCM>73181600</NCM>
        <CFOP>5102</CFOP><uCom>CX</uCom><qCom>10.0000</qCom>
        <vUnCom>12.3400000000</vUnCom><vProd>123.40</vProd></prod>
    </det>
    <total><ICMSTot><vProd>173.40</vProd><vNF>180.00</vNF></ICMSTot></total>
  </infNFe></NFe>
  <protNFe><infProt><cStat>100</cStat><nProt>135250000012345</nProt></infProt></protNFe>
</nfeProc>"#
        )
    }

    #[test]
    fn itens_saem_na_ordem_do_documento() {
        let itens = extrair_itens(&nfe_com_itens());
        assert_eq!(itens.len(), 2);

        assert_eq!(itens[0].numero_item, 1);
        assert_eq!(itens[0].codigo_produto, "SKU-001");
        assert_eq!(itens[0].descricao, "Parafuso sextavado");
        assert_eq!(itens[0].ncm, "73181500");
        assert_eq!(itens[0].cfop, "5102");
        assert_eq!(itens[0].unidade, "UN");
        assert_eq!(itens[0].quantidade.to_string(), "100.0000");
        assert_eq!(itens[0].valor_total.to_string(), "50.00");

        assert_eq!(itens[1].numero_item, 2);
        assert_eq!(itens[1].unidade, "CX");
    }

    #[test]
    fn documento_sem_itens_ou_quebrado_vira_lista_vazia() {
        assert!(extrair_itens("<vazio/>").is_empty());
        assert!(extrair_itens("nem xml").is_empty());
    }

    #[test]
    fn protocolo_e_status_vem_do_prot_nfe() {
        let (status, protocolo) = extrair_protocolo(&nfe_com_itens());
        assert_eq!(status, "100");
        assert_eq!(protocolo, "135250000012345");

        let (status, protocolo) = extrair_protocolo("<semProtocolo/>");
        assert_eq!(status, "");
        assert_eq!(protocolo, "");
    }

    #[test]
    fn valor_produtos_vem_do_icms_tot() {
        assert_eq!(extrair_valor_produtos(&nfe_com_itens()).to_string(), "173.40");
        assert_eq!(extrair_valor_produtos("<vazio/>"), Decimal::ZERO);
    }
}
