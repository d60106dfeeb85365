//! Database operations for discovered documents.

use chrono::Utc;
use diesel::prelude::*;

use crate::{
    config::db::Connection,
    error::ServiceError,
    models::documento_descoberto::{DocumentoDescoberto, NovoDocumentoDescoberto},
    schema::documentos_descobertos::dsl::*,
};

fn db_error(acao: &str, err: diesel::result::Error) -> ServiceError {
    log::error!("Failed to {} discovered document: {}", acao, err);
    ServiceError::internal_server_error(format!("Failed to {} discovered document", acao))
        .with_context(|ctx| ctx.with_tag("documento").with_detail(err.to_string()))
}

/// Insert-or-ignore keyed by the access key.
///
/// Returns `true` when the row was new, `false` when another run already
/// recorded the same access key (first writer wins).
pub fn upsert_documento(
    novo: NovoDocumentoDescoberto,
    conn: &mut Connection,
) -> Result<bool, ServiceError> {
    diesel::insert_into(documentos_descobertos)
        .values(novo)
        .on_conflict(chave_acesso)
        .do_nothing()
        .execute(conn)
        .map(|linhas| linhas == 1)
        .map_err(|err| db_error("record", err))
}

pub fn find_documento_by_id(
    documento_id: i32,
    conn: &mut Connection,
) -> Result<DocumentoDescoberto, ServiceError> {
    documentos_descobertos
        .filter(id.eq(documento_id))
        .get_result::<DocumentoDescoberto>(conn)
        .map_err(|err| match err {
            diesel::result::Error::NotFound => ServiceError::not_found(format!(
                "Discovered document with id {} not found",
                documento_id
            ))
            .with_context(|ctx| ctx.with_tag("documento")),
            _ => db_error("find", err),
        })
}

pub fn find_documento_by_chave(
    chave: &str,
    conn: &mut Connection,
) -> Result<Option<DocumentoDescoberto>, ServiceError> {
    documentos_descobertos
        .filter(chave_acesso.eq(chave))
        .get_result::<DocumentoDescoberto>(conn)
        .optional()
        .map_err(|err| db_error("find", err))
}

pub fn find_documentos_by_consulta(
    consulta: i32,
    conn: &mut Connection,
) -> Result<Vec<DocumentoDescoberto>, ServiceError> {
    documentos_descobertos
        .filter(consulta_id.eq(consulta))
        .order(data_emissao.desc())
        .load::<DocumentoDescoberto>(conn)
        .map_err(|err| db_error("list", err))
}

/// Oldest summaries still waiting for their full XML, download-queue
/// order.
pub fn find_documentos_sem_xml(
    limite: i64,
    conn: &mut Connection,
) -> Result<Vec<DocumentoDescoberto>, ServiceError> {
    documentos_descobertos
        .filter(xml_baixado.eq(false))
        .order(id.asc())
        .limit(limite)
        .load::<DocumentoDescoberto>(conn)
        .map_err(|err| db_error("list", err))
}

/// Per-role counts for a run, dashboard material.
pub fn contar_por_papel(
    consulta: i32,
    conn: &mut Connection,
) -> Result<Vec<(String, i64)>, ServiceError> {
    documentos_descobertos
        .filter(consulta_id.eq(consulta))
        .group_by(papel_cnpj)
        .select((papel_cnpj, diesel::dsl::count_star()))
        .load::<(String, i64)>(conn)
        .map_err(|err| db_error("count", err))
}

/// Flip the document to imported after the explicit import action.
pub fn marcar_importado(
    documento_id: i32,
    conn: &mut Connection,
) -> Result<DocumentoDescoberto, ServiceError> {
    diesel::update(documentos_descobertos.filter(id.eq(documento_id)))
        .set((importado.eq(true), data_importacao.eq(Some(Utc::now()))))
        .get_result::<DocumentoDescoberto>(conn)
        .map_err(|err| match err {
            diesel::result::Error::NotFound => ServiceError::not_found(format!(
                "Discovered document with id {} not found",
                documento_id
            ))
            .with_context(|ctx| ctx.with_tag("documento")),
            _ => db_error("update", err),
        })
}

/// Store the full XML fetched by the per-key download service.
pub fn gravar_xml_baixado(
    documento_id: i32,
    xml: &str,
    conn: &mut Connection,
) -> Result<usize, ServiceError> {
    diesel::update(documentos_descobertos.filter(id.eq(documento_id)))
        .set((xml_completo.eq(xml), xml_baixado.eq(true)))
        .execute(conn)
        .map_err(|err| db_error("update", err))
}
