use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};
mod backend;
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::Config;
use error::CompositorError;
use services::Session;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Цикл не остановился вовремя: ресурсы окон не освобождены
const EXIT_SHUTDOWN_TIMEOUT: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "glcomp")]
#[command(about = "Минимальный композитный менеджер X11 на GLX texture-from-pixmap")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "glcomp.toml")]
    config: String,

    /// Режим сухого запуска (без X-сервера, headless-бэкенд)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (перекрывает конфигурацию)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Конфигурация нужна до логирования: из неё берутся уровень и формат
    let loaded = Config::load(&args.config);
    let (directive, format) = match &loaded {
        Ok(config) => (
            args.log_level.clone().unwrap_or_else(|| config.log_directive().to_string()),
            config.logging.format.clone(),
        ),
        Err(_) => (args.log_level.clone().unwrap_or_else(|| "info".to_string()), "compact".to_string()),
    };
    init_tracing(&directive, &format);

    info!("Запуск glcomp v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            let e = CompositorError::Config(e);
            error!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - X-сервер не используется");
    }

    // Цикл событий однопоточный и блокирующий: соединение и GL-контекст живут в его потоке
    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = stop.clone();
    let dry_run = args.dry_run;
    let mut compositor = tokio::task::spawn_blocking(move || run_compositor(&config, dry_run, loop_stop));

    let joined = tokio::select! {
        joined = &mut compositor => joined,
        name = shutdown_signal() => {
            info!("Получен сигнал завершения ({})", name);
            stop.store(true, Ordering::Relaxed);

            match wait_for_loop(&mut compositor, SHUTDOWN_TIMEOUT).await {
                Some(joined) => joined,
                None => {
                    error!(
                        "Цикл событий не остановился за {:?}, окна не освобождены",
                        SHUTDOWN_TIMEOUT
                    );
                    // Блокирующий поток не даст рантайму завершиться сам
                    std::process::exit(EXIT_SHUTDOWN_TIMEOUT);
                }
            }
        }
    };

    match joined {
        Ok(Ok(())) => {
            info!("glcomp завершил работу");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            error!("Поток компоновщика завершился аварийно: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Открывает бэкенд и сессию, крутит цикл и всегда освобождает ресурсы окон
fn run_compositor(config: &Config, dry_run: bool, stop: Arc<AtomicBool>) -> error::Result<()> {
    let backend = backend::create_backend(config, dry_run)?;
    let mut session = Session::open(backend, config, stop)?;
    info!("Все компоненты инициализированы");

    let result = session.run();
    session.close();
    result
}

/// `None`, если задача не завершилась за `timeout`
async fn wait_for_loop<T>(task: &mut JoinHandle<T>, timeout: Duration) -> Option<Result<T, JoinError>> {
    tokio::time::timeout(timeout, task).await.ok()
}

/// SIGINT, SIGTERM или SIGHUP; возвращает имя полученного сигнала
async fn shutdown_signal() -> &'static str {
    let (mut terminate, mut hangup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(terminate), Ok(hangup)) => (terminate, hangup),
        _ => {
            warn!("SIGTERM/SIGHUP недоступны, ожидается только Ctrl+C");
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Ошибка при ожидании сигнала завершения: {}", err);
            }
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    }
}

fn init_tracing(directive: &str, format: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "full" {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}
