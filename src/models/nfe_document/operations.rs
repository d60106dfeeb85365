//! Database operations for imported NFE documents and their line items.

use diesel::{prelude::*, result::DatabaseErrorKind};

use crate::{
    config::db::Connection,
    error::ServiceError,
    models::nfe_document::{NewNfeDocument, NewNfeItem, NfeDocument, NfeItem},
    schema::{nfe_documents::dsl as nfe_dsl, nfe_itens::dsl as item_dsl},
};

/// Creates the imported NFE record.
///
/// A unique violation on the access key means the document was already
/// imported (possibly by another run) and surfaces as `Conflict`.
pub fn create_nfe_document(
    new_nfe: NewNfeDocument,
    conn: &mut Connection,
) -> Result<NfeDocument, ServiceError> {
    diesel::insert_into(nfe_dsl::nfe_documents)
        .values(new_nfe)
        .get_result::<NfeDocument>(conn)
        .map_err(|err| {
            log::error!("Failed to create NFE document: {}", err);
            if let diesel::result::Error::DatabaseError(kind, info) = &err {
                let base_message = info.message().to_string();
                let service_error = match kind {
                    DatabaseErrorKind::UniqueViolation => ServiceError::conflict(base_message),
                    DatabaseErrorKind::ForeignKeyViolation
                    | DatabaseErrorKind::CheckViolation
                    | DatabaseErrorKind::NotNullViolation => ServiceError::bad_request(base_message),
                    _ => ServiceError::internal_server_error("Failed to create NFE document"),
                };
                return service_error.with_context(|ctx| ctx.with_tag("nfe"));
            }

            ServiceError::internal_server_error("Failed to create NFE document")
                .with_context(|ctx| ctx.with_tag("nfe").with_detail(err.to_string()))
        })
}

pub fn insert_nfe_itens(
    itens: Vec<NewNfeItem>,
    conn: &mut Connection,
) -> Result<usize, ServiceError> {
    diesel::insert_into(item_dsl::nfe_itens)
        .values(itens)
        .execute(conn)
        .map_err(|err| {
            log::error!("Failed to insert NFE items: {}", err);
            ServiceError::internal_server_error("Failed to insert NFE items")
                .with_context(|ctx| ctx.with_tag("nfe").with_detail(err.to_string()))
        })
}

pub fn find_nfe_document_by_chave(
    chave: &str,
    conn: &mut Connection,
) -> Result<Option<NfeDocument>, ServiceError> {
    nfe_dsl::nfe_documents
        .filter(nfe_dsl::chave_acesso.eq(chave))
        .get_result::<NfeDocument>(conn)
        .optional()
        .map_err(|err| {
            log::error!("Failed to find NFE document: {}", err);
            ServiceError::internal_server_error("Failed to find NFE document")
                .with_context(|ctx| ctx.with_tag("nfe").with_detail(err.to_string()))
        })
}

pub fn find_itens_by_nfe(
    nfe: i32,
    conn: &mut Connection,
) -> Result<Vec<NfeItem>, ServiceError> {
    item_dsl::nfe_itens
        .filter(item_dsl::nfe_id.eq(nfe))
        .order(item_dsl::numero_item.asc())
        .load::<NfeItem>(conn)
        .map_err(|err| {
            log::error!("Failed to list NFE items: {}", err);
            ServiceError::internal_server_error("Failed to list NFE items")
                .with_context(|ctx| ctx.with_tag("nfe").with_detail(err.to_string()))
        })
}
