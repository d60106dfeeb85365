//! Consulta dispatcher.
//!
//! Polls for PENDENTE discovery runs and drives each one to a terminal
//! state, sequentially, and enqueues new runs for certificates whose
//! automatic-query interval has elapsed. One process, one run at a time;
//! cross-process isolation relies on the guarded status transitions and
//! the access-key uniqueness constraint.

use std::time::Duration;

use dfehub::config::db::{self, Pool};
use dfehub::config::sefaz::{Ambiente, SefazConfig};
use dfehub::constants;
use dfehub::error::ServiceResult;
use dfehub::models::consulta::operations as consulta_ops;
use dfehub::models::documento_descoberto::operations as documento_ops;
use dfehub::services::consulta_service;
use dfehub::utils::segredo::ChaveMestra;

const INTERVALO_PADRAO_SEGUNDOS: u64 = 60;
const LOTE_DOWNLOAD_XML: i64 = 20;

fn init_tracing() {
    if let Err(err) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records into tracing: {}", err);
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let resultado = if std::env::var("DFEHUB_LOG_JSON").map(|v| v == "1").unwrap_or(false) {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt().with_env_filter(filter).json().finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt().with_env_filter(filter).finish(),
        )
    };
    if let Err(err) = resultado {
        eprintln!("Failed to install tracing subscriber: {}", err);
    }
}

async fn ciclo(pool: &Pool, config: &SefazConfig, chave: &ChaveMestra) -> ServiceResult<()> {
    let pendentes = {
        let mut conn = pool.get().map_err(|e| {
            dfehub::error::ServiceError::internal_server_error(format!(
                "Failed to get database connection: {}",
                e
            ))
        })?;

        let criadas = consulta_service::enfileirar_consultas_automaticas(&mut conn)?;
        if !criadas.is_empty() {
            log::info!("Enqueued {} automatic run(s)", criadas.len());
        }
        consulta_ops::find_consultas_pendentes(&mut conn)?
    };

    for pendente in pendentes {
        match consulta_service::executar_consulta(pendente.id, pool, config, chave).await {
            Ok(terminal) => log::info!(
                "Run {} finished with status {} ({} found, {} imported, {} errors)",
                terminal.id,
                terminal.status,
                terminal.total_encontrados,
                terminal.total_importados,
                terminal.total_erros
            ),
            Err(err) => log::error!("Run {} could not be driven: {}", pendente.id, err.message()),
        }
    }

    // summaries arrive without their XML; fetch a bounded batch per cycle
    let para_baixar = {
        let mut conn = pool.get().map_err(|e| {
            dfehub::error::ServiceError::internal_server_error(format!(
                "Failed to get database connection: {}",
                e
            ))
        })?;
        documento_ops::find_documentos_sem_xml(LOTE_DOWNLOAD_XML, &mut conn)?
    };

    for documento in para_baixar {
        match consulta_service::baixar_xml_documento(documento.id, pool, config, chave).await {
            Ok(completo) => log::info!(
                "Full XML stored for document {} (chave {})",
                completo.id,
                completo.chave_acesso
            ),
            Err(err) => log::warn!(
                "Download of document {} failed: {}",
                documento.id,
                err.message()
            ),
        }
    }
    Ok(())
}

#[actix_rt::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let database_url = match std::env::var(constants::ENV_DATABASE_URL) {
        Ok(url) => url,
        Err(_) => {
            log::error!("{} environment variable is not set", constants::ENV_DATABASE_URL);
            std::process::exit(1);
        }
    };

    let pool = match db::init_pool(&database_url) {
        Ok(pool) => pool,
        Err(err) => {
            log::error!("{}", err.message());
            std::process::exit(1);
        }
    };

    match pool.get() {
        Ok(mut conn) => {
            if let Err(err) = db::run_migrations(&mut conn) {
                log::error!("{}", err.message());
                std::process::exit(1);
            }
        }
        Err(err) => {
            log::error!("Failed to get database connection: {}", err);
            std::process::exit(1);
        }
    }

    let chave = match ChaveMestra::from_env() {
        Ok(chave) => chave,
        Err(err) => {
            log::error!("{}", err.message());
            std::process::exit(1);
        }
    };

    let mut config = SefazConfig::producao();
    if let Ok(valor) = std::env::var(constants::ENV_SEFAZ_AMBIENTE) {
        config.ambiente = Ambiente::from_env_var(&valor);
    }

    let intervalo = std::env::var(constants::ENV_INTERVALO_DISPATCHER)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(INTERVALO_PADRAO_SEGUNDOS);

    log::info!(
        "Dispatcher started: ambiente={:?}, polling every {}s",
        config.ambiente,
        intervalo
    );

    loop {
        if let Err(err) = ciclo(&pool, &config, &chave).await {
            log::error!("Dispatcher cycle failed: {}", err.message());
        }
        actix_rt::time::sleep(Duration::from_secs(intervalo)).await;
    }
}
