//! Certificate Service - PKCS#12 loading and validation
//!
//! Turns a stored A1 certificate (sealed PFX bytes + sealed password) into
//! the PEM identity the mutual-TLS client needs, and extracts the validity
//! metadata recorded on upload. Pure transformation: no network or disk
//! side effects. Key material exists only in memory and is never logged.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::pkcs12::Pkcs12;
use openssl::x509::{X509NameRef, X509};

use crate::{
    error::{SefazError, ServiceError, ServiceResult},
    models::certificado::{CertificadoDigital, NovoCertificado},
    models::certificado::{operations as cert_ops, validators as cert_validators},
    services::functional_patterns::QueryReader,
    utils::segredo::{self, ChaveMestra},
};

/// Decrypted PEM pair used for mutual TLS. No `Debug`: the private key
/// must never reach a log line.
#[derive(Clone)]
pub struct IdentidadePem {
    pub chave_privada: Vec<u8>,
    pub certificado: Vec<u8>,
}

/// Validity metadata extracted from the certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct DadosCertificado {
    pub validade_inicio: NaiveDate,
    pub validade_fim: NaiveDate,
    pub emissor: String,
    pub titular: String,
}

/// Decrypt a PKCS#12 container and convert it to a PEM key/cert pair.
///
/// A wrong password, a malformed container or a container missing either
/// half of the pair all fail with `InvalidCertificate`; nothing partial is
/// ever returned.
pub fn carregar_pfx(pfx: &[u8], senha: &str) -> Result<IdentidadePem, SefazError> {
    let container = Pkcs12::from_der(pfx)
        .map_err(|err| SefazError::InvalidCertificate(format!("malformed PKCS#12: {}", err)))?;

    let parsed = container
        .parse2(senha)
        .map_err(|err| SefazError::InvalidCertificate(format!("decrypt failed: {}", err)))?;

    let pkey = parsed
        .pkey
        .ok_or_else(|| SefazError::InvalidCertificate("container has no private key".into()))?;
    let cert = parsed
        .cert
        .ok_or_else(|| SefazError::InvalidCertificate("container has no certificate".into()))?;

    let chave_privada = pkey
        .private_key_to_pem_pkcs8()
        .map_err(|err| SefazError::InvalidCertificate(format!("key export failed: {}", err)))?;
    let certificado = cert
        .to_pem()
        .map_err(|err| SefazError::InvalidCertificate(format!("cert export failed: {}", err)))?;

    Ok(IdentidadePem {
        chave_privada,
        certificado,
    })
}

/// Extract the validity window and issuer/subject of a PEM certificate.
pub fn inspecionar_certificado(cert_pem: &[u8]) -> Result<DadosCertificado, SefazError> {
    let cert = X509::from_pem(cert_pem)
        .map_err(|err| SefazError::InvalidCertificate(format!("undecodable PEM: {}", err)))?;

    Ok(DadosCertificado {
        validade_inicio: asn1_para_data(cert.not_before())?,
        validade_fim: asn1_para_data(cert.not_after())?,
        emissor: nome_x509(cert.issuer_name()),
        titular: nome_x509(cert.subject_name()),
    })
}

/// Reject a certificate whose window does not contain `hoje`.
pub fn verificar_vigencia(dados: &DadosCertificado, hoje: NaiveDate) -> Result<(), SefazError> {
    if dados.validade_inicio <= hoje && hoje <= dados.validade_fim {
        Ok(())
    } else {
        Err(SefazError::CertificateExpired {
            inicio: dados.validade_inicio,
            fim: dados.validade_fim,
        })
    }
}

/// Upload-time validation: the container must open with the given password
/// and be inside its validity window today.
pub fn validar_upload(
    pfx: &[u8],
    senha: &str,
) -> Result<(IdentidadePem, DadosCertificado), SefazError> {
    let identidade = carregar_pfx(pfx, senha)?;
    let dados = inspecionar_certificado(&identidade.certificado)?;
    verificar_vigencia(&dados, Utc::now().date_naive())?;
    Ok((identidade, dados))
}

/// Strip the usual CNPJ mask characters.
pub fn normalizar_cnpj(cnpj: &str) -> String {
    cnpj.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Upload payload handed in by the (out-of-scope) web layer.
#[derive(Clone)]
pub struct UploadCertificado {
    pub tenant_id: String,
    pub nome: String,
    pub cnpj: String,
    pub uf: String,
    pub arquivo_pfx: Vec<u8>,
    pub senha: String,
    pub consulta_automatica: bool,
    pub intervalo_consulta: i32,
}

/// Validate an uploaded PFX and seal it for storage.
pub fn preparar_novo_certificado(
    upload: UploadCertificado,
    chave: &ChaveMestra,
) -> ServiceResult<NovoCertificado> {
    let (_, dados) = validar_upload(&upload.arquivo_pfx, &upload.senha)
        .map_err(ServiceError::from)
        .map_err(|e| e.with_tag("certificado"))?;

    let novo = NovoCertificado {
        tenant_id: upload.tenant_id,
        nome: upload.nome,
        cnpj: normalizar_cnpj(&upload.cnpj),
        uf: upload.uf.to_uppercase(),
        arquivo_pfx: segredo::selar(chave, &upload.arquivo_pfx)?,
        senha_pfx: segredo::selar(chave, upload.senha.as_bytes())?,
        validade_inicio: dados.validade_inicio,
        validade_fim: dados.validade_fim,
        emissor: dados.emissor,
        ativo: true,
        consulta_automatica: upload.consulta_automatica,
        intervalo_consulta: upload.intervalo_consulta,
    };
    cert_validators::validate_novo_certificado(&novo)?;
    Ok(novo)
}

/// Build a QueryReader that persists a prepared certificate.
pub fn criar_certificado_reader(novo: NovoCertificado) -> QueryReader<CertificadoDigital> {
    QueryReader::new(move |conn| cert_ops::create_certificado(novo.clone(), conn))
}

/// Open a stored certificate back into a usable PEM identity.
pub fn abrir_identidade(
    cert: &CertificadoDigital,
    chave: &ChaveMestra,
) -> Result<IdentidadePem, SefazError> {
    let pfx = segredo::abrir(chave, &cert.arquivo_pfx)
        .map_err(|e| SefazError::InvalidCertificate(format!("sealed PFX: {}", e.message())))?;
    let senha = segredo::abrir_texto(chave, &cert.senha_pfx)
        .map_err(|e| SefazError::InvalidCertificate(format!("sealed password: {}", e.message())))?;
    carregar_pfx(&pfx, &senha)
}

fn asn1_para_data(tempo: &Asn1TimeRef) -> Result<NaiveDate, SefazError> {
    let epoch = Asn1Time::from_unix(0)
        .map_err(|err| SefazError::InvalidCertificate(format!("epoch: {}", err)))?;
    let diff = epoch
        .diff(tempo)
        .map_err(|err| SefazError::InvalidCertificate(format!("validity decode: {}", err)))?;
    let segundos = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    let quando: DateTime<Utc> = Utc
        .timestamp_opt(segundos, 0)
        .single()
        .ok_or_else(|| SefazError::InvalidCertificate("validity out of range".into()))?;
    Ok(quando.date_naive())
}

fn nome_x509(nome: &X509NameRef) -> String {
    nome.entries()
        .filter_map(|entry| {
            let campo = entry.object().nid().short_name().ok()?;
            let valor = entry.data().as_utf8().ok()?;
            Some(format!("{}={}", campo, valor))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::X509NameBuilder;

    const SENHA: &str = "segredo-do-pfx";

    fn pfx_de_teste(dias_validade: u32) -> Vec<u8> {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();

        let mut nome = X509NameBuilder::new().unwrap();
        nome.append_entry_by_nid(Nid::COMMONNAME, "EMPRESA TESTE LTDA:12345678000190")
            .unwrap();
        nome.append_entry_by_nid(Nid::ORGANIZATIONNAME, "AC Teste").unwrap();
        let nome = nome.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&nome).unwrap();
        builder.set_issuer_name(&nome).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(dias_validade).unwrap())
            .unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        Pkcs12::builder()
            .name("teste")
            .pkey(&pkey)
            .cert(&cert)
            .build2(SENHA)
            .unwrap()
            .to_der()
            .unwrap()
    }

    #[test]
    fn carregar_pfx_round_trip() {
        let pfx = pfx_de_teste(365);
        let identidade = carregar_pfx(&pfx, SENHA).unwrap();

        // the exported certificate's public key must match the private key
        let cert = X509::from_pem(&identidade.certificado).unwrap();
        let chave = PKey::private_key_from_pem(&identidade.chave_privada).unwrap();
        assert!(chave.public_eq(&cert.public_key().unwrap()));
    }

    #[test]
    fn senha_errada_falha_sem_artefatos() {
        let pfx = pfx_de_teste(365);
        match carregar_pfx(&pfx, "senha-errada") {
            Err(SefazError::InvalidCertificate(_)) => {}
            other => panic!("expected InvalidCertificate, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn container_malformado_falha() {
        assert!(matches!(
            carregar_pfx(b"nao sou um pkcs12", SENHA),
            Err(SefazError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn inspecao_extrai_janela_e_nomes() {
        let pfx = pfx_de_teste(365);
        let identidade = carregar_pfx(&pfx, SENHA).unwrap();
        let dados = inspecionar_certificado(&identidade.certificado).unwrap();

        let hoje = Utc::now().date_naive();
        assert!(dados.validade_inicio <= hoje);
        assert!(dados.validade_fim > hoje);
        assert!(dados.emissor.contains("AC Teste"));
        assert!(dados.titular.contains("EMPRESA TESTE"));
    }

    #[test]
    fn vigencia_rejeita_certificado_vencido() {
        let dados = DadosCertificado {
            validade_inicio: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            validade_fim: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            emissor: String::new(),
            titular: String::new(),
        };
        let hoje = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(matches!(
            verificar_vigencia(&dados, hoje),
            Err(SefazError::CertificateExpired { .. })
        ));
        assert!(verificar_vigencia(&dados, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()).is_ok());
    }

    #[test]
    fn pem_invalido_falha_na_inspecao() {
        assert!(matches!(
            inspecionar_certificado(b"nao sou pem"),
            Err(SefazError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn normalizar_cnpj_remove_mascara() {
        assert_eq!(normalizar_cnpj("12.345.678/0001-90"), "12345678000190");
        assert_eq!(normalizar_cnpj("12345678000190"), "12345678000190");
    }

    #[test]
    fn identidade_selada_reabre() {
        let chave = ChaveMestra::from_bytes([3u8; 32]);
        let pfx = pfx_de_teste(365);

        let upload = UploadCertificado {
            tenant_id: "t1".into(),
            nome: "Certificado matriz".into(),
            cnpj: "12.345.678/0001-90".into(),
            uf: "sp".into(),
            arquivo_pfx: pfx,
            senha: SENHA.into(),
            consulta_automatica: false,
            intervalo_consulta: 60,
        };
        let novo = preparar_novo_certificado(upload, &chave).unwrap();
        assert_eq!(novo.cnpj, "12345678000190");
        assert_eq!(novo.uf, "SP");
        // sealed blobs are not the plaintext
        assert_ne!(novo.senha_pfx, SENHA.as_bytes());

        let senha = segredo::abrir_texto(&chave, &novo.senha_pfx).unwrap();
        let pfx = segredo::abrir(&chave, &novo.arquivo_pfx).unwrap();
        assert!(carregar_pfx(&pfx, &senha).is_ok());
    }
}
