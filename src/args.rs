use anyhow::{Context, Result};
use std::net::Ipv4Addr;

const USAGE: &str = "Uso: heaping [-c <ciclos>] <ipv4> [ipv4 ...]";

pub struct MonitorArgs {
    pub hosts: Vec<Ipv4Addr>,
    pub count: Option<u64>,
}

pub fn parse() -> Result<MonitorArgs> {
    parse_from(std::env::args().skip(1))
}

/// Interpreta os argumentos (sem o nome do programa).
pub fn parse_from<I>(args: I) -> Result<MonitorArgs>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let args: Vec<I::Item> = args.into_iter().collect();
    let mut hosts = Vec::new();
    let mut count = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_ref() {
            "-c" => {
                let val: &str = args
                    .get(i + 1)
                    .with_context(|| format!("Faltou o valor para -c\n{}", USAGE))?
                    .as_ref();
                let c: u64 = val
                    .parse()
                    .with_context(|| format!("Valor inválido para -c: '{}'", val))?;
                if c == 0 {
                    anyhow::bail!("Valor inválido para -c: precisa ser positivo");
                }
                count = Some(c);
                i += 1;
            }
            val => {
                let host: Ipv4Addr = val
                    .parse()
                    .with_context(|| format!("Endereço IP inválido: '{}'", val))?;
                hosts.push(host);
            }
        }
        i += 1;
    }

    if hosts.is_empty() {
        anyhow::bail!("{}", USAGE);
    }

    Ok(MonitorArgs { hosts, count })
}
