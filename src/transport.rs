// Criação e configuração de sockets de baixo nível
use anyhow::{Context, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Lado de envio: entrega um datagrama ICMP a um host.
pub trait EchoSink {
    fn send_echo(&self, pkt: &[u8], host: Ipv4Addr) -> io::Result<usize>;
}

/// Lado de recepção: lê um datagrama (com cabeçalho IP) e sua origem.
pub trait EchoSource {
    fn recv_echo(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)>;
}

/// Abre o socket ICMP RAW compartilhado pelas duas threads.
///
/// `poll` vira o read timeout, para que o receiver perceba a parada.
pub fn open_raw_icmp(poll: Duration) -> Result<Socket> {
    // SOCK_RAW + IPPROTO_ICMP: o kernel entrega o datagrama IP inteiro.
    let sock = Socket::new(
        Domain::IPV4,
        Type::from(libc::SOCK_RAW),
        Some(Protocol::ICMPV4),
    )
    .context("socket(SOCK_RAW) falhou. Verifique se está rodando como root")?;

    sock.set_read_timeout(Some(poll))
        .context("Falha ao configurar o timeout de leitura")?;

    Ok(sock)
}

impl EchoSink for Socket {
    fn send_echo(&self, pkt: &[u8], host: Ipv4Addr) -> io::Result<usize> {
        // Porta 0 é ignorada para ICMP
        let to = SockAddr::from(SocketAddrV4::new(host, 0));
        self.send_to(pkt, &to)
    }
}

impl EchoSource for Socket {
    fn recv_echo(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        // Usando `read` do std::io::Read
        let n = (&*self).read(buf)?;
        Ok((n, ipv4_source(&buf[..n])))
    }
}

/// Origem do datagrama: o socket raw entrega o cabeçalho IPv4 junto.
fn ipv4_source(datagram: &[u8]) -> Ipv4Addr {
    match datagram.get(12..16) {
        Some(&[a, b, c, d]) => Ipv4Addr::new(a, b, c, d),
        _ => Ipv4Addr::UNSPECIFIED,
    }
}
