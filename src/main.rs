// Tratamento de erros ergonômico
use anyhow::{Context, Result};

use log::info;

use std::io;
use std::sync::Arc;

// Módulos locais
mod args;
mod icmp;
mod monitor;
mod receiver;
mod sender;
mod shutdown;
mod transport;

use monitor::Settings;
use shutdown::{Shutdown, StopReason};

/// Programa principal: pinga uma lista de endereços a cada 10s.
/// Requer privilégios de root (Raw Sockets).
fn main() -> Result<()> {
    // Logs de diagnóstico vão para stderr; eventos vão para stdout.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Tudo que pode falhar na configuração falha antes de abrir o socket
    let args = args::parse()?;
    let settings = Settings::new(args.hosts, args.count);

    // SIGINT e SIGTERM pedem a parada; as duas threads percebem em até um poll
    let shutdown = Shutdown::new();
    let on_signal = shutdown.clone();
    ctrlc::set_handler(move || on_signal.trigger(StopReason::Signal))
        .context("Erro ao configurar handler de SIGINT/SIGTERM")?;

    let sock = Arc::new(transport::open_raw_icmp(settings.poll)?);
    info!("monitorando {} hosts", settings.hosts.len());

    let reason = monitor::run(sock, &settings, &shutdown, io::stdout(), io::stdout())?;
    info!("encerrando: {}", reason);

    Ok(())
}
