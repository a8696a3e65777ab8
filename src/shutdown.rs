use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Por que o monitor está parando.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT/SIGTERM recebido.
    Signal,
    /// O limite de ciclos foi atingido.
    Finished,
    /// Uma das threads terminou sem que ninguém pedisse.
    PeerExited,
    /// Erro fatal em uma das threads (ex.: stdout fechado).
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Signal => "signal",
            StopReason::Finished => "cycle limit reached",
            StopReason::PeerExited => "peer thread exited",
            StopReason::Failed => "fatal error",
        };
        f.write_str(s)
    }
}

struct Inner {
    reason: Mutex<Option<StopReason>>,
    wake: Condvar,
}

/// Sinal de parada compartilhado entre sender, receiver e handler de sinais.
///
/// Só o primeiro `trigger` vale; os seguintes são ignorados.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Shutdown {
            inner: Arc::new(Inner {
                reason: Mutex::new(None),
                wake: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<StopReason>> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn trigger(&self, reason: StopReason) {
        let mut current = self.lock();
        if current.is_none() {
            *current = Some(reason);
            self.inner.wake.notify_all();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.lock().is_some()
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.lock()
    }

    /// Dorme por `dur` ou até a parada ser pedida.
    ///
    /// Retorna `true` se acordou por causa da parada.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        let mut current = self.lock();
        while current.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            current = match self.inner.wake.wait_timeout(current, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Guarda que dispara `reason` ao ser dropada, a menos que seja desarmada.
    pub fn guard(&self, reason: StopReason) -> ShutdownGuard {
        ShutdownGuard {
            shutdown: self.clone(),
            reason: Some(reason),
        }
    }
}

/// Dispara a parada quando a thread dona termina (inclusive por panic).
pub struct ShutdownGuard {
    shutdown: Shutdown,
    reason: Option<StopReason>,
}

impl ShutdownGuard {
    pub fn disarm(mut self) {
        self.reason = None;
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Some(reason) = self.reason.take() {
            self.shutdown.trigger(reason);
        }
    }
}
