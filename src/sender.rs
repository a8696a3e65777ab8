use anyhow::Result;
use log::{debug, info};

use std::io::Write;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::icmp::{self, RunId, Timestamp};
use crate::shutdown::{Shutdown, StopReason};
use crate::transport::EchoSink;

/// Envia um Echo Request para cada host a cada `interval`.
pub struct Sender<'a, T: EchoSink + ?Sized> {
    pub sink: &'a T,
    pub hosts: &'a [Ipv4Addr],
    pub ident: RunId,
    pub max_cycles: Option<u64>,
    pub interval: Duration,
    pub shutdown: &'a Shutdown,
}

impl<T: EchoSink + ?Sized> Sender<'_, T> {
    /// Roda ciclos até o limite ou até a parada ser pedida.
    ///
    /// Devolve o número de ciclos completos. Ao sair, sempre dispara a
    /// parada para que o receiver também termine.
    pub fn run<W: Write>(&self, out: &mut W) -> Result<u64> {
        let result = self.cycles(out);
        let reason = match &result {
            Ok(_) => StopReason::Finished,
            Err(_) => StopReason::Failed,
        };
        // Se já havia um motivo (sinal, receiver morto), ele prevalece.
        self.shutdown.trigger(reason);
        result
    }

    fn cycles<W: Write>(&self, out: &mut W) -> Result<u64> {
        let mut seq: u16 = 0;
        let mut done: u64 = 0;

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            self.cycle(seq, out)?;
            done += 1;

            // Número de sequência acompanha o campo de 16 bits do pacote.
            seq = seq.wrapping_add(1);

            // Com limite, não dorme depois do último ciclo
            if self.max_cycles.is_some_and(|limit| done >= limit) {
                info!("limite de {} ciclos atingido", done);
                break;
            }

            if self.shutdown.sleep(self.interval) {
                break;
            }
        }

        debug!("sender parou após {} ciclos", done);
        Ok(done)
    }

    /// Um ciclo: um pacote para cada host, na ordem da lista.
    fn cycle<W: Write>(&self, seq: u16, out: &mut W) -> Result<()> {
        writeln!(out, "meta: new cycle (seq={})", seq)?;
        out.flush()?;

        let t0 = Instant::now();
        let mut sent = 0usize;

        for &host in self.hosts {
            // Timestamp novo por host: cada envio mede o próprio RTT.
            let pkt = icmp::build_echo_request(self.ident, seq, Timestamp::now());

            // Falha para um host não interrompe o ciclo
            if let Err(e) = self.sink.send_echo(&pkt, host) {
                writeln!(out, "sendto({}): {}", host, e)?;
            }
            sent += 1;
        }

        writeln!(
            out,
            "meta: sent {} pings in {} ms",
            sent,
            t0.elapsed().as_millis()
        )?;
        out.flush()?;
        Ok(())
    }
}
