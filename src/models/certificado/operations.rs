//! Database operations for digital certificates.

use chrono::Utc;
use diesel::{prelude::*, result::DatabaseErrorKind};

use crate::{
    config::db::Connection,
    error::ServiceError,
    models::certificado::{AtualizarCertificado, CertificadoDigital, NovoCertificado},
    schema::certificados_digitais::dsl::*,
};

pub fn create_certificado(
    novo: NovoCertificado,
    conn: &mut Connection,
) -> Result<CertificadoDigital, ServiceError> {
    diesel::insert_into(certificados_digitais)
        .values(novo)
        .get_result::<CertificadoDigital>(conn)
        .map_err(|err| {
            log::error!("Failed to create certificate: {}", err);
            match &err {
                diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                    ServiceError::conflict(info.message().to_string())
                        .with_context(|ctx| ctx.with_tag("certificado"))
                }
                _ => ServiceError::internal_server_error("Failed to create certificate")
                    .with_context(|ctx| ctx.with_tag("certificado").with_detail(err.to_string())),
            }
        })
}

pub fn find_certificado_by_id(
    certificado_id: i32,
    conn: &mut Connection,
) -> Result<CertificadoDigital, ServiceError> {
    certificados_digitais
        .filter(id.eq(certificado_id))
        .get_result::<CertificadoDigital>(conn)
        .map_err(|err| match err {
            diesel::result::Error::NotFound => {
                ServiceError::not_found(format!("Certificate with id {} not found", certificado_id))
                    .with_context(|ctx| ctx.with_tag("certificado"))
            }
            _ => {
                log::error!("Failed to find certificate: {}", err);
                ServiceError::internal_server_error("Failed to find certificate")
                    .with_context(|ctx| ctx.with_tag("certificado").with_detail(err.to_string()))
            }
        })
}

pub fn find_certificados_by_tenant(
    tenant: &str,
    conn: &mut Connection,
) -> Result<Vec<CertificadoDigital>, ServiceError> {
    certificados_digitais
        .filter(tenant_id.eq(tenant))
        .order(created_at.desc())
        .load::<CertificadoDigital>(conn)
        .map_err(|err| {
            log::error!("Failed to list certificates: {}", err);
            ServiceError::internal_server_error("Failed to list certificates")
                .with_context(|ctx| ctx.with_tag("certificado").with_detail(err.to_string()))
        })
}

/// Active certificates flagged for automatic queries whose interval has
/// elapsed. The interval arithmetic happens in Rust; the candidate set is
/// small (one row per registered certificate).
pub fn find_certificados_para_consulta_automatica(
    conn: &mut Connection,
) -> Result<Vec<CertificadoDigital>, ServiceError> {
    let agora = Utc::now();
    certificados_digitais
        .filter(ativo.eq(true))
        .filter(consulta_automatica.eq(true))
        .load::<CertificadoDigital>(conn)
        .map(|certs| {
            certs
                .into_iter()
                .filter(|cert| cert.consulta_devida(agora))
                .collect()
        })
        .map_err(|err| {
            log::error!("Failed to list certificates due for automatic query: {}", err);
            ServiceError::internal_server_error("Failed to list certificates")
                .with_context(|ctx| ctx.with_tag("certificado").with_detail(err.to_string()))
        })
}

pub fn update_certificado_flags(
    certificado_id: i32,
    mut mudancas: AtualizarCertificado,
    conn: &mut Connection,
) -> Result<CertificadoDigital, ServiceError> {
    mudancas.updated_at = Some(Utc::now());
    diesel::update(certificados_digitais.filter(id.eq(certificado_id)))
        .set(mudancas)
        .get_result::<CertificadoDigital>(conn)
        .map_err(|err| match err {
            diesel::result::Error::NotFound => {
                ServiceError::not_found(format!("Certificate with id {} not found", certificado_id))
                    .with_context(|ctx| ctx.with_tag("certificado"))
            }
            _ => {
                log::error!("Failed to update certificate: {}", err);
                ServiceError::internal_server_error("Failed to update certificate")
                    .with_context(|ctx| ctx.with_tag("certificado").with_detail(err.to_string()))
            }
        })
}

/// Record that a query run reached a terminal state for this certificate.
pub fn touch_ultima_consulta(
    certificado_id: i32,
    conn: &mut Connection,
) -> Result<usize, ServiceError> {
    diesel::update(certificados_digitais.filter(id.eq(certificado_id)))
        .set((ultima_consulta.eq(Utc::now()), updated_at.eq(Utc::now())))
        .execute(conn)
        .map_err(|err| {
            log::error!("Failed to touch ultima_consulta: {}", err);
            ServiceError::internal_server_error("Failed to update certificate")
                .with_context(|ctx| ctx.with_tag("certificado").with_detail(err.to_string()))
        })
}

pub fn delete_certificado(
    certificado_id: i32,
    conn: &mut Connection,
) -> Result<usize, ServiceError> {
    let deleted = diesel::delete(certificados_digitais.filter(id.eq(certificado_id)))
        .execute(conn)
        .map_err(|err| {
            log::error!("Failed to delete certificate: {}", err);
            ServiceError::internal_server_error("Failed to delete certificate")
                .with_context(|ctx| ctx.with_tag("certificado").with_detail(err.to_string()))
        })?;

    if deleted == 0 {
        Err(
            ServiceError::not_found(format!("Certificate with id {} not found", certificado_id))
                .with_context(|ctx| ctx.with_tag("certificado")),
        )
    } else {
        Ok(deleted)
    }
}
