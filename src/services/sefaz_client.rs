//! SEFAZ SOAP Client
//!
//! Mutual-TLS transport for the government webservices. The client owns an
//! `awc` HTTP client whose TLS connector carries the certificate identity,
//! plus the injected endpoint configuration. Envelope construction is kept
//! in pure functions so the payloads can be tested without a socket.

use std::time::Duration;

use awc::{Client, Connector};
use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslMethod};
use openssl::x509::X509;

use crate::config::sefaz::{Ambiente, SefazConfig, ServicoSefaz};
use crate::constants::{NSU_LARGURA, SOAP_CONTENT_TYPE, VERSAO_CONS_SIT, VERSAO_DIST_DFE};
use crate::error::SefazError;
use crate::services::certificado_service::IdentidadePem;
use crate::services::sefaz_parser::{self, PaginaDistribuicao};

// Distribution pages carry base64 batches and routinely exceed the awc
// default body limit.
const LIMITE_CORPO_RESPOSTA: usize = 20 * 1024 * 1024;

pub struct SefazClient {
    http: Client,
    config: SefazConfig,
}

impl SefazClient {
    /// Build a client whose every request presents the given identity.
    pub fn novo(identidade: &IdentidadePem, config: SefazConfig) -> Result<Self, SefazError> {
        let certificado = X509::from_pem(&identidade.certificado)
            .map_err(|err| SefazError::InvalidCertificate(format!("client cert: {}", err)))?;
        let chave = PKey::private_key_from_pem(&identidade.chave_privada)
            .map_err(|err| SefazError::InvalidCertificate(format!("client key: {}", err)))?;

        let mut tls = SslConnector::builder(SslMethod::tls_client())
            .map_err(|err| SefazError::InvalidCertificate(format!("TLS setup: {}", err)))?;
        tls.set_certificate(&certificado)
            .map_err(|err| SefazError::InvalidCertificate(format!("TLS cert: {}", err)))?;
        tls.set_private_key(&chave)
            .map_err(|err| SefazError::InvalidCertificate(format!("TLS key: {}", err)))?;
        tls.check_private_key()
            .map_err(|err| SefazError::InvalidCertificate(format!("key/cert mismatch: {}", err)))?;

        let http = Client::builder()
            .connector(Connector::new().openssl(tls.build()))
            .finish();

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &SefazConfig {
        &self.config
    }

    /// Fetch and decode one page of the distribution stream.
    pub async fn distribuir_dfe(
        &self,
        uf: &str,
        cnpj: &str,
        ult_nsu: u64,
    ) -> Result<PaginaDistribuicao, SefazError> {
        let url = self.config.endpoint(ServicoSefaz::NfeDistribuicao, uf)?;
        let codigo_uf = self.config.codigo_uf(uf)?;
        let corpo =
            montar_envelope_distribuicao(self.config.ambiente, codigo_uf, cnpj, ult_nsu);

        log::debug!("distDFeInt uf={} ultNSU={}", uf, formatar_nsu(ult_nsu));
        let resposta = self
            .post_soap(url, corpo, self.config.timeout_distribuicao)
            .await?;
        sefaz_parser::parsear_resposta_distribuicao(&resposta)
    }

    /// Download a full XML by its 44-digit access key (status service).
    pub async fn baixar_xml(&self, uf: &str, chave: &str) -> Result<String, SefazError> {
        let url = self.config.endpoint(ServicoSefaz::NfeStatus, uf)?;
        let corpo = montar_envelope_consulta_chave(self.config.ambiente, chave);

        log::debug!("consSitNFe uf={} chave={}", uf, chave);
        self.post_soap(url, corpo, self.config.timeout_status).await
    }

    async fn post_soap(
        &self,
        url: &str,
        corpo: String,
        timeout: Duration,
    ) -> Result<String, SefazError> {
        let mut resposta = self
            .http
            .post(url)
            .insert_header(("Content-Type", SOAP_CONTENT_TYPE))
            .timeout(timeout)
            .send_body(corpo)
            .await
            .map_err(|err| SefazError::NetworkError(err.to_string()))?;

        if !resposta.status().is_success() {
            return Err(SefazError::UpstreamError {
                status: resposta.status().as_u16(),
            });
        }

        let bytes = resposta
            .body()
            .limit(LIMITE_CORPO_RESPOSTA)
            .await
            .map_err(|err| SefazError::NetworkError(err.to_string()))?;

        String::from_utf8(bytes.to_vec())
            .map_err(|_| SefazError::ParseError("response body is not valid UTF-8".into()))
    }
}

/// 15-digit zero-padded NSU cursor, as the distribution schema requires.
pub fn formatar_nsu(nsu: u64) -> String {
    format!("{:0largura$}", nsu, largura = NSU_LARGURA)
}

/// SOAP 1.2 envelope for `distDFeInt` (distribution with NSU cursor).
pub fn montar_envelope_distribuicao(
    ambiente: Ambiente,
    codigo_uf: &str,
    cnpj: &str,
    ult_nsu: u64,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
  <soap:Body>
    <nfeDistDFeInteresse xmlns="http://www.portalfiscal.inf.br/wsdl/NFeDistribuicaoDFe">
      <nfeDadosMsg>
        <distDFeInt versao="{versao}" xmlns="http://www.portalfiscal.inf.br/nfe">
          <tpAmb>{tp_amb}</tpAmb>
          <cUFAutor>{codigo_uf}</cUFAutor>
          <CNPJ>{cnpj}</CNPJ>
          <distNSU>
            <ultNSU>{ult_nsu}</ultNSU>
          </distNSU>
        </distDFeInt>
      </nfeDadosMsg>
    </nfeDistDFeInteresse>
  </soap:Body>
</soap:Envelope>"#,
        versao = VERSAO_DIST_DFE,
        tp_amb = ambiente.codigo(),
        codigo_uf = codigo_uf,
        cnpj = cnpj,
        ult_nsu = formatar_nsu(ult_nsu),
    )
}

/// SOAP 1.2 envelope for `consSitNFe` (full-XML download by access key).
pub fn montar_envelope_consulta_chave(ambiente: Ambiente, chave: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
  <soap:Body>
    <nfeConsultaNF xmlns="http://www.portalfiscal.inf.br/wsdl/NFeConsultaProtocolo4">
      <nfeDadosMsg>
        <consSitNFe versao="{versao}" xmlns="http://www.portalfiscal.inf.br/nfe">
          <tpAmb>{tp_amb}</tpAmb>
          <xServ>CONSULTAR</xServ>
          <chNFe>{chave}</chNFe>
        </consSitNFe>
      </nfeDadosMsg>
    </nfeConsultaNF>
  </soap:Body>
</soap:Envelope>"#,
        versao = VERSAO_CONS_SIT,
        tp_amb = ambiente.codigo(),
        chave = chave,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nsu_sempre_tem_quinze_digitos() {
        assert_eq!(formatar_nsu(0), "000000000000000");
        assert_eq!(formatar_nsu(123), "000000000000123");
        assert_eq!(formatar_nsu(999_999_999_999_999), "999999999999999");
    }

    #[test]
    fn envelope_distribuicao_carrega_cursor_e_autor() {
        let corpo =
            montar_envelope_distribuicao(Ambiente::Producao, "35", "12345678000190", 42);

        assert!(corpo.contains("<tpAmb>1</tpAmb>"));
        assert!(corpo.contains("<cUFAutor>35</cUFAutor>"));
        assert!(corpo.contains("<CNPJ>12345678000190</CNPJ>"));
        assert!(corpo.contains("<ultNSU>000000000000042</ultNSU>"));
        assert!(corpo.contains(r#"versao="1.01""#));
    }

    #[test]
    fn envelope_consulta_carrega_chave() {
        let chave = "35250112345678000190550010000001231000001234";
        let corpo = montar_envelope_consulta_chave(Ambiente::Homologacao, chave);

        assert!(corpo.contains("<tpAmb>2</tpAmb>"));
        assert!(corpo.contains("<xServ>CONSULTAR</xServ>"));
        assert!(corpo.contains(&format!("<chNFe>{}</chNFe>", chave)));
        assert!(corpo.contains(r#"versao="4.00""#));
    }

    #[actix_rt::test]
    async fn cliente_constroi_com_identidade_valida() {
        use openssl::asn1::Asn1Time;
        use openssl::hash::MessageDigest;
        use openssl::nid::Nid;
        use openssl::rsa::Rsa;
        use openssl::x509::X509NameBuilder;

        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        let mut nome = X509NameBuilder::new().unwrap();
        nome.append_entry_by_nid(Nid::COMMONNAME, "teste").unwrap();
        let nome = nome.build();
        let mut builder = X509::builder().unwrap();
        builder.set_subject_name(&nome).unwrap();
        builder.set_issuer_name(&nome).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        let identidade = IdentidadePem {
            chave_privada: pkey.private_key_to_pem_pkcs8().unwrap(),
            certificado: cert.to_pem().unwrap(),
        };

        let cliente = SefazClient::novo(&identidade, SefazConfig::producao()).unwrap();
        assert!(cliente
            .config()
            .suporta(ServicoSefaz::NfeDistribuicao, "SP"));
    }
}
