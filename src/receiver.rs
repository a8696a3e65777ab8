use anyhow::Result;
use log::{debug, warn};

use std::io::{self, Write};

use crate::icmp::{self, RunId, Timestamp};
use crate::shutdown::Shutdown;
use crate::transport::EchoSource;

/// Buffer de recepção (MTU típica)
pub const RECV_BUF_LEN: usize = 1500;

/// Lê o socket raw e imprime um evento para cada resposta nossa.
pub struct Receiver<'a, T: EchoSource + ?Sized> {
    pub source: &'a T,
    pub ident: RunId,
    pub shutdown: &'a Shutdown,
}

impl<T: EchoSource + ?Sized> Receiver<'_, T> {
    /// Loop de leitura; só termina com a parada ou se `out` falhar.
    ///
    /// Devolve quantos eventos foram impressos.
    pub fn run<W: Write>(&self, out: &mut W) -> Result<u64> {
        let mut buf = [0u8; RECV_BUF_LEN];
        let mut events = 0u64;

        while !self.shutdown.is_triggered() {
            let (n, from) = match self.source.recv_echo(&mut buf) {
                Ok(r) => r,
                // Sinal entregue no meio da leitura: tenta de novo
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Timeout de leitura: volta ao topo para checar a parada
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("recvfrom: {}", e);
                    continue;
                }
            };

            if let Some(event) = icmp::decode(&buf[..n], from, self.ident, Timestamp::now()) {
                writeln!(out, "{}", event)?;
                out.flush()?;
                events += 1;
            }
        }

        debug!("receiver parou após {} eventos", events);
        Ok(events)
    }
}
