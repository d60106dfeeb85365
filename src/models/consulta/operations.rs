//! Database operations for SEFAZ query runs.
//!
//! Status transitions are guarded inside the UPDATE itself (the expected
//! current status goes into the WHERE clause), so concurrent dispatchers
//! cannot double-run or resurrect a terminal run.

use chrono::Utc;
use diesel::prelude::*;

use crate::{
    config::db::Connection,
    constants,
    error::ServiceError,
    models::consulta::{ConsultaSefaz, NovaConsulta, StatusConsulta},
    schema::consultas_sefaz::dsl::*,
};

fn db_error(acao: &str, err: diesel::result::Error) -> ServiceError {
    log::error!("Failed to {} query run: {}", acao, err);
    ServiceError::internal_server_error(format!("Failed to {} query run", acao))
        .with_context(|ctx| ctx.with_tag("consulta").with_detail(err.to_string()))
}

pub fn create_consulta(
    nova: NovaConsulta,
    conn: &mut Connection,
) -> Result<ConsultaSefaz, ServiceError> {
    diesel::insert_into(consultas_sefaz)
        .values(nova)
        .get_result::<ConsultaSefaz>(conn)
        .map_err(|err| db_error("create", err))
}

pub fn find_consulta_by_id(
    consulta_id: i32,
    conn: &mut Connection,
) -> Result<ConsultaSefaz, ServiceError> {
    consultas_sefaz
        .filter(id.eq(consulta_id))
        .get_result::<ConsultaSefaz>(conn)
        .map_err(|err| match err {
            diesel::result::Error::NotFound => {
                ServiceError::not_found(format!("Query run with id {} not found", consulta_id))
                    .with_context(|ctx| ctx.with_tag("consulta"))
            }
            _ => db_error("find", err),
        })
}

pub fn find_consultas_pendentes(conn: &mut Connection) -> Result<Vec<ConsultaSefaz>, ServiceError> {
    consultas_sefaz
        .filter(status.eq(StatusConsulta::Pendente.as_str()))
        .order(data_consulta.asc())
        .load::<ConsultaSefaz>(conn)
        .map_err(|err| db_error("list pending", err))
}

pub fn find_consultas_by_certificado(
    certificado: i32,
    limit: i64,
    conn: &mut Connection,
) -> Result<Vec<ConsultaSefaz>, ServiceError> {
    consultas_sefaz
        .filter(certificado_id.eq(certificado))
        .order(data_consulta.desc())
        .limit(limit.clamp(1, 500))
        .load::<ConsultaSefaz>(conn)
        .map_err(|err| db_error("list", err))
}

/// PENDENTE -> PROCESSANDO.
pub fn marcar_processando(
    consulta_id: i32,
    conn: &mut Connection,
) -> Result<ConsultaSefaz, ServiceError> {
    diesel::update(
        consultas_sefaz
            .filter(id.eq(consulta_id))
            .filter(status.eq(StatusConsulta::Pendente.as_str())),
    )
    .set(status.eq(StatusConsulta::Processando.as_str()))
    .get_result::<ConsultaSefaz>(conn)
    .map_err(|err| match err {
        diesel::result::Error::NotFound => {
            ServiceError::conflict(constants::MESSAGE_CONSULTA_NAO_PENDENTE)
                .with_context(|ctx| ctx.with_tag("consulta"))
        }
        _ => db_error("dispatch", err),
    })
}

/// Bump the running totals. Only valid while PROCESSANDO; the counters are
/// additive, so they never decrease during a run.
pub fn incrementar_totais(
    consulta_id: i32,
    encontrados: i32,
    erros: i32,
    conn: &mut Connection,
) -> Result<usize, ServiceError> {
    diesel::update(
        consultas_sefaz
            .filter(id.eq(consulta_id))
            .filter(status.eq(StatusConsulta::Processando.as_str())),
    )
    .set((
        total_encontrados.eq(total_encontrados + encontrados),
        total_erros.eq(total_erros + erros),
    ))
    .execute(conn)
    .map_err(|err| db_error("update totals of", err))
}

pub fn incrementar_importados(
    consulta_id: i32,
    delta: i32,
    conn: &mut Connection,
) -> Result<usize, ServiceError> {
    diesel::update(consultas_sefaz.filter(id.eq(consulta_id)))
        .set(total_importados.eq(total_importados + delta))
        .execute(conn)
        .map_err(|err| db_error("update imported total of", err))
}

/// Append a line to the run's detailed log.
pub fn append_log(
    consulta_id: i32,
    linha: &str,
    conn: &mut Connection,
) -> Result<usize, ServiceError> {
    let linha = format!("{}\n", linha);
    diesel::update(consultas_sefaz.filter(id.eq(consulta_id)))
        .set(log_detalhado.eq(log_detalhado.concat(linha)))
        .execute(conn)
        .map_err(|err| db_error("append log to", err))
}

/// PROCESSANDO -> CONCLUIDA.
pub fn concluir_consulta(
    consulta_id: i32,
    conn: &mut Connection,
) -> Result<ConsultaSefaz, ServiceError> {
    diesel::update(
        consultas_sefaz
            .filter(id.eq(consulta_id))
            .filter(status.eq(StatusConsulta::Processando.as_str())),
    )
    .set((
        status.eq(StatusConsulta::Concluida.as_str()),
        data_conclusao.eq(Some(Utc::now())),
    ))
    .get_result::<ConsultaSefaz>(conn)
    .map_err(|err| match err {
        diesel::result::Error::NotFound => {
            ServiceError::conflict(constants::MESSAGE_CONSULTA_NAO_PROCESSANDO)
                .with_context(|ctx| ctx.with_tag("consulta"))
        }
        _ => db_error("complete", err),
    })
}

/// PROCESSANDO -> ERRO, recording the human-readable failure message.
pub fn falhar_consulta(
    consulta_id: i32,
    mensagem: &str,
    conn: &mut Connection,
) -> Result<ConsultaSefaz, ServiceError> {
    diesel::update(
        consultas_sefaz
            .filter(id.eq(consulta_id))
            .filter(status.eq(StatusConsulta::Processando.as_str())),
    )
    .set((
        status.eq(StatusConsulta::Erro.as_str()),
        mensagem_erro.eq(mensagem),
        data_conclusao.eq(Some(Utc::now())),
    ))
    .get_result::<ConsultaSefaz>(conn)
    .map_err(|err| match err {
        diesel::result::Error::NotFound => {
            ServiceError::conflict(constants::MESSAGE_CONSULTA_NAO_PROCESSANDO)
                .with_context(|ctx| ctx.with_tag("consulta"))
        }
        _ => db_error("fail", err),
    })
}
