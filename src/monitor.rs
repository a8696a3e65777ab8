use anyhow::{Context, Result, anyhow};
use log::{debug, info};

use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::icmp::RunId;
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::shutdown::{Shutdown, StopReason};
use crate::transport::{EchoSink, EchoSource};

/// Intervalo fixo entre ciclos
pub const SEND_INTERVAL: Duration = Duration::from_secs(10);

/// Timeout de leitura do receiver: granularidade com que ele percebe a parada.
pub const RECV_POLL: Duration = Duration::from_secs(1);

/// Parâmetros de uma execução.
#[derive(Clone, Debug)]
pub struct Settings {
    pub hosts: Vec<Ipv4Addr>,
    pub max_cycles: Option<u64>,
    pub interval: Duration,
    /// Read timeout do socket compartilhado.
    pub poll: Duration,
}

impl Settings {
    pub fn new(hosts: Vec<Ipv4Addr>, max_cycles: Option<u64>) -> Self {
        Settings {
            hosts,
            max_cycles,
            interval: SEND_INTERVAL,
            poll: RECV_POLL,
        }
    }
}

/// Roda sender e receiver em paralelo sobre o mesmo transporte.
///
/// O sender roda na thread atual e o receiver numa thread própria. O
/// identificador é calculado uma vez aqui e copiado para os dois lados.
/// Retorna quando os dois terminaram, com o motivo da parada.
pub fn run<T, W1, W2>(
    transport: Arc<T>,
    settings: &Settings,
    shutdown: &Shutdown,
    mut sender_out: W1,
    mut receiver_out: W2,
) -> Result<StopReason>
where
    T: EchoSink + EchoSource + Send + Sync + 'static,
    W1: Write,
    W2: Write + Send + 'static,
{
    let ident = RunId::from_process();
    info!("identificador ICMP: {}", ident);

    let rx_transport = Arc::clone(&transport);
    let rx_shutdown = shutdown.clone();
    let receiver = thread::Builder::new()
        .name("receiver".into())
        .spawn(move || {
            // Se a thread sair sem que a parada tenha sido pedida, avisa o sender.
            let guard = rx_shutdown.guard(StopReason::PeerExited);
            let receiver = Receiver {
                source: &*rx_transport,
                ident,
                shutdown: &rx_shutdown,
            };
            let result = receiver.run(&mut receiver_out);
            if result.is_err() {
                rx_shutdown.trigger(StopReason::Failed);
            }
            guard.disarm();
            result
        })
        .context("Falha ao criar a thread do receiver")?;

    let sender = Sender {
        sink: &*transport,
        hosts: &settings.hosts,
        ident,
        max_cycles: settings.max_cycles,
        interval: settings.interval,
        shutdown,
    };
    let sent = sender.run(&mut sender_out);

    let received = receiver
        .join()
        .map_err(|_| anyhow!("thread do receiver entrou em pânico"))?;

    let cycles = sent.context("sender falhou")?;
    let events = received.context("receiver falhou")?;
    let reason = shutdown.reason().unwrap_or(StopReason::Finished);
    debug!(
        "fim: {} ciclos, {} eventos ({})",
        cycles, events, reason
    );
    Ok(reason)
}
