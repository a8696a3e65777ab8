use std::fmt;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Tipos ICMP usados pelo monitor (RFC 792).
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACH: u8 = 3;
pub const ICMP_ECHO: u8 = 8;

/// Cabeçalho ICMP mínimo: type, code, checksum, identifier, sequence.
pub const ICMP_MIN_LEN: usize = 8;

/// Timestamp embutido no payload: segundos + microssegundos (2 x 8 bytes).
pub const TIMESTAMP_LEN: usize = 16;

/// Tamanho fixo do Echo Request: cabeçalho (8) + timestamp (16).
pub const PACKET_LEN: usize = ICMP_MIN_LEN + TIMESTAMP_LEN;

/// Menor cabeçalho IPv4 válido (IHL = 5).
const IPV4_MIN_HEADER_LEN: usize = 20;

/// Identificador do processo, gravado em todo Echo Request enviado.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunId(pub u16);

impl RunId {
    /// Deriva o identificador do PID, truncado para 16 bits.
    pub fn from_process() -> Self {
        RunId((std::process::id() & 0xFFFF) as u16)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Instante de parede em segundos + microssegundos desde a época Unix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl Timestamp {
    pub fn new(sec: i64, usec: i64) -> Self {
        Timestamp { sec, usec }
    }

    pub fn now() -> Self {
        // Relógio antes da época vira zero
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::new(d.as_secs() as i64, i64::from(d.subsec_micros()))
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.sec.to_be_bytes());
        buf[8..16].copy_from_slice(&self.usec.to_be_bytes());
    }

    fn read_from(buf: &[u8]) -> Option<Self> {
        let sec = buf.get(0..8)?.try_into().ok()?;
        let usec = buf.get(8..16)?.try_into().ok()?;
        Some(Timestamp {
            sec: i64::from_be_bytes(sec),
            usec: i64::from_be_bytes(usec),
        })
    }
}

/// Diferença `now - then` em milissegundos.
///
/// Se os microssegundos ficarem negativos, empresta um segundo antes de
/// combinar os campos. `None` se algum campo de microssegundos estiver
/// fora de `0..1_000_000` ou se a conta estourar `i64`.
pub fn elapsed_ms(now: Timestamp, then: Timestamp) -> Option<i64> {
    const USEC_RANGE: std::ops::Range<i64> = 0..1_000_000;
    if !USEC_RANGE.contains(&now.usec) || !USEC_RANGE.contains(&then.usec) {
        return None;
    }

    let mut sec = now.sec;
    let mut usec = now.usec - then.usec;
    if usec < 0 {
        sec = sec.checked_sub(1)?;
        usec += 1_000_000;
    }
    sec = sec.checked_sub(then.sec)?;
    sec.checked_mul(1000)?.checked_add(usec / 1000)
}

/// Calcula o checksum ICMP (RFC 1071).
///
/// Soma as palavras de 16 bits big-endian, pulando o campo de checksum
/// (bytes 2..4), de modo que o resultado independe do valor já gravado ali.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    // Type e code entram; o checksum fica de fora.
    if data.len() >= 2 {
        sum += u32::from(u16::from_be_bytes([data[0], data[1]]));
    }

    let mut rest = data.get(4..).unwrap_or(&[]);
    while rest.len() >= 2 {
        sum += u32::from(u16::from_be_bytes([rest[0], rest[1]]));
        rest = &rest[2..];
    }

    // Byte ímpar no final: palavra com o byte baixo zerado.
    if let Some(&last) = rest.first() {
        sum += u32::from(last) << 8;
    }

    // Duas dobras: não sobra carry
    sum = (sum >> 16) + (sum & 0xFFFF);
    sum += sum >> 16;

    !(sum as u16)
}

/// Preenche `pkt` com um Echo Request (type=8, code=0).
///
/// `pkt` precisa ter pelo menos `PACKET_LEN` bytes; o que passar do
/// timestamp recebe o padrão byte = offset.
pub fn fill_echo_request(pkt: &mut [u8], ident: RunId, seq: u16, sent: Timestamp) {
    debug_assert!(pkt.len() >= PACKET_LEN);

    // Type=8 (Echo Request), Code=0, checksum zerado até o fim
    pkt[0] = ICMP_ECHO;
    pkt[1] = 0;
    pkt[2] = 0;
    pkt[3] = 0;

    // Identifier e Sequence (big-endian)
    pkt[4..6].copy_from_slice(&ident.0.to_be_bytes());
    pkt[6..8].copy_from_slice(&seq.to_be_bytes());

    sent.write_to(&mut pkt[ICMP_MIN_LEN..PACKET_LEN]);

    for (offset, byte) in pkt.iter_mut().enumerate().skip(PACKET_LEN) {
        *byte = offset as u8;
    }

    let csum = checksum(pkt);
    pkt[2..4].copy_from_slice(&csum.to_be_bytes());
}

/// Monta o Echo Request de 24 bytes enviado a cada host.
pub fn build_echo_request(ident: RunId, seq: u16, sent: Timestamp) -> [u8; PACKET_LEN] {
    let mut pkt = [0u8; PACKET_LEN];
    fill_echo_request(&mut pkt, ident, seq, sent);
    pkt
}

/// Evento de alcançabilidade extraído de um pacote recebido.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Reply { host: Ipv4Addr, ms: i64, seq: u16 },
    Unreachable { host: Ipv4Addr },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Reply { host, ms, seq } => write!(f, "{}: {} ms (seq={})", host, ms, seq),
            Event::Unreachable { host } => write!(f, "{}: unreachable", host),
        }
    }
}

/// Comprimento do cabeçalho IPv4 que começa em `buf`, se for plausível.
fn ip_header_len(buf: &[u8]) -> Option<usize> {
    let hl = usize::from(buf.first()? & 0x0F) * 4;
    (hl >= IPV4_MIN_HEADER_LEN).then_some(hl)
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    let bytes = buf.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Interpreta um datagrama lido do socket raw (cabeçalho IP incluso).
///
/// Só devolve evento para Echo Reply ou Destination Unreachable ligados a
/// um Echo Request deste processo; todo o resto é descartado em silêncio.
pub fn decode(buf: &[u8], from: Ipv4Addr, ident: RunId, now: Timestamp) -> Option<Event> {
    let hl = ip_header_len(buf)?;
    if buf.len() < hl + ICMP_MIN_LEN {
        return None;
    }

    let icmp = &buf[hl..];
    let id = read_u16(icmp, 4)?;
    match icmp[0] {
        ICMP_ECHO_REPLY if id == ident.0 => {
            let seq = read_u16(icmp, 6)?;
            let then = Timestamp::read_from(icmp.get(ICMP_MIN_LEN..PACKET_LEN)?)?;
            Some(Event::Reply {
                host: from,
                ms: elapsed_ms(now, then)?,
                seq,
            })
        }
        ICMP_DEST_UNREACH => {
            // O payload traz o datagrama original: cabeçalho IP + 8 bytes do ICMP.
            let orig = &icmp[ICMP_MIN_LEN..];
            let ohl = ip_header_len(orig)?;
            if buf.len() < hl + ICMP_MIN_LEN + ohl + ICMP_MIN_LEN {
                return None;
            }

            let orig_icmp = &orig[ohl..];
            if orig_icmp[0] != ICMP_ECHO || read_u16(orig_icmp, 4)? != ident.0 {
                return None;
            }

            // Destino do pacote original, não quem reportou o erro.
            let dst: [u8; 4] = orig.get(16..20)?.try_into().ok()?;
            Some(Event::Unreachable {
                host: Ipv4Addr::from(dst),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const ID: RunId = RunId(0x1234);

    /// Cabeçalho IPv4 mínimo (IHL=5) com origem e destino dados.
    pub(crate) fn ipv4_header(src: Ipv4Addr, dst: Ipv4Addr, payload_len: usize) -> Vec<u8> {
        let mut hdr = vec![0u8; 20];
        hdr[0] = 0x45;
        hdr[2..4].copy_from_slice(&((20 + payload_len) as u16).to_be_bytes());
        hdr[8] = 64;
        hdr[9] = 1;
        hdr[12..16].copy_from_slice(&src.octets());
        hdr[16..20].copy_from_slice(&dst.octets());
        hdr
    }

    /// Transforma um Echo Request na resposta que o host devolveria.
    pub(crate) fn reply_for(request: &[u8], host: Ipv4Addr) -> Vec<u8> {
        let mut icmp = request.to_vec();
        icmp[0] = ICMP_ECHO_REPLY;
        let csum = checksum(&icmp);
        icmp[2..4].copy_from_slice(&csum.to_be_bytes());

        let mut pkt = ipv4_header(host, Ipv4Addr::new(10, 0, 0, 1), icmp.len());
        pkt.extend_from_slice(&icmp);
        pkt
    }

    fn unreachable_for(request: &[u8], router: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let orig_ip = ipv4_header(Ipv4Addr::new(10, 0, 0, 1), dst, request.len());
        let mut pkt = ipv4_header(router, Ipv4Addr::new(10, 0, 0, 1), 8 + 20 + 8);
        pkt.extend_from_slice(&[ICMP_DEST_UNREACH, 1, 0, 0, 0, 0, 0, 0]);
        pkt.extend_from_slice(&orig_ip);
        pkt.extend_from_slice(&request[..8]);
        pkt
    }

    /// Soma de verificação completa, incluindo o campo de checksum.
    fn verify_sum(data: &[u8]) -> u16 {
        let mut sum: u32 = data
            .chunks(2)
            .map(|w| u32::from(w[0]) << 8 | u32::from(*w.get(1).unwrap_or(&0)))
            .sum();
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }

    #[test]
    fn checksum_matches_rfc1071_example() {
        // Palavras 0001 f203 f4f5 f6f7 do RFC 1071 (soma ddf2), com f203
        // movida para depois do campo de checksum.
        let data = [0x00, 0x01, 0x00, 0x00, 0xf4, 0xf5, 0xf6, 0xf7, 0xf2, 0x03];
        assert_eq!(checksum(&data), 0x220d);
    }

    #[test]
    fn checksum_ignores_current_checksum_field() {
        let mut data = [0x00, 0x01, 0xAB, 0xCD, 0xf4, 0xf5, 0xf6, 0xf7, 0xf2, 0x03];
        assert_eq!(checksum(&data), 0x220d);
        data[2] = 0xFF;
        data[3] = 0xFF;
        assert_eq!(checksum(&data), 0x220d);
    }

    #[test]
    fn checksum_pads_odd_trailing_byte() {
        let data = [0x08, 0x00, 0x00, 0x00, 0x12];
        assert_eq!(checksum(&data), !0x1a00u16);
    }

    #[test]
    fn checksum_folds_carries() {
        let data = [0xFF, 0xFF, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF];
        // 3 * 0xFFFF = 0x2FFFD -> 0xFFFF depois das dobras
        assert_eq!(checksum(&data), 0x0000);
    }

    #[test]
    fn built_request_verifies_to_zero() {
        for seq in [0u16, 1, 0x00FF, 0xFFFF] {
            let pkt = build_echo_request(ID, seq, Timestamp::new(1_700_000_000, 987_654));
            assert_eq!(verify_sum(&pkt), 0, "seq={}", seq);
        }
    }

    #[test]
    fn build_echo_request_layout() {
        let sent = Timestamp::new(42, 500_000);
        let pkt = build_echo_request(ID, 7, sent);

        assert_eq!(pkt.len(), 24);
        assert_eq!(pkt[0], ICMP_ECHO);
        assert_eq!(pkt[1], 0);
        assert_eq!(&pkt[4..6], &[0x12, 0x34]);
        assert_eq!(&pkt[6..8], &[0x00, 0x07]);
        assert_eq!(Timestamp::read_from(&pkt[8..24]), Some(sent));
        assert_eq!(u16::from_be_bytes([pkt[2], pkt[3]]), checksum(&pkt));
    }

    #[test]
    fn wider_buffer_gets_offset_filler() {
        let mut pkt = [0u8; 32];
        fill_echo_request(&mut pkt, ID, 3, Timestamp::new(1, 2));
        let filler: Vec<u8> = (24u8..32).collect();
        assert_eq!(&pkt[24..], filler.as_slice());
        assert_eq!(verify_sum(&pkt), 0);
    }

    // Mesmo resultado do tvsub() do heaping em C: (5s,100us) - (4s,900000us)
    // = 100 ms e (5s,900000us) - (4s,100us) = 1899 ms.
    #[test]
    fn elapsed_borrows_a_second() {
        let ms = elapsed_ms(Timestamp::new(5, 100), Timestamp::new(4, 900_000));
        assert_eq!(ms, Some(100));
    }

    #[test]
    fn elapsed_without_borrow() {
        let ms = elapsed_ms(Timestamp::new(5, 900_000), Timestamp::new(4, 100));
        assert_eq!(ms, Some(1899));
        let ms = elapsed_ms(Timestamp::new(5, 300_000), Timestamp::new(5, 100_000));
        assert_eq!(ms, Some(200));
    }

    #[test]
    fn elapsed_rejects_overflow_and_bad_usec() {
        let now = Timestamp::new(1_700_000_000, 0);
        assert_eq!(elapsed_ms(now, Timestamp::new(i64::MIN, 0)), None);
        assert_eq!(elapsed_ms(Timestamp::new(i64::MIN, 0), Timestamp::new(0, 1)), None);
        assert_eq!(elapsed_ms(Timestamp::new(i64::MAX / 10, 0), Timestamp::new(0, 0)), None);
        assert_eq!(elapsed_ms(now, Timestamp::new(0, 1_000_000)), None);
        assert_eq!(elapsed_ms(now, Timestamp::new(0, -1)), None);
    }

    #[test]
    fn decode_drops_reply_with_foreign_timeval_payload() {
        // Outro ping com o mesmo identificador, gravando um struct timeval
        // little-endian no payload.
        let host = Ipv4Addr::new(192, 0, 2, 7);
        let mut req = build_echo_request(ID, 2, Timestamp::new(0, 0));
        req[8..16].copy_from_slice(&1_700_000_000i64.to_le_bytes());
        req[16..24].copy_from_slice(&123_456i64.to_le_bytes());
        let pkt = reply_for(&req, host);

        assert_eq!(decode(&pkt, host, ID, Timestamp::now()), None);
    }

    #[test]
    fn decode_matching_reply() {
        let host = Ipv4Addr::new(192, 0, 2, 7);
        let req = build_echo_request(ID, 9, Timestamp::new(100, 250_000));
        let pkt = reply_for(&req, host);

        let event = decode(&pkt, host, ID, Timestamp::new(100, 262_500));
        assert_eq!(event, Some(Event::Reply { host, ms: 12, seq: 9 }));
        assert_eq!(event.unwrap().to_string(), "192.0.2.7: 12 ms (seq=9)");
    }

    #[test]
    fn decode_reply_with_real_clock() {
        let host = Ipv4Addr::new(192, 0, 2, 8);
        let req = build_echo_request(ID, 1, Timestamp::now());
        let pkt = reply_for(&req, host);

        match decode(&pkt, host, ID, Timestamp::now()) {
            Some(Event::Reply { seq, ms, .. }) => {
                assert_eq!(seq, 1);
                assert!((0..1000).contains(&ms), "ms={}", ms);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decode_ignores_foreign_identifier() {
        let host = Ipv4Addr::new(192, 0, 2, 7);
        let req = build_echo_request(RunId(0x4321), 9, Timestamp::new(1, 0));
        let reply = reply_for(&req, host);
        assert_eq!(decode(&reply, host, ID, Timestamp::new(2, 0)), None);

        let unreach = unreachable_for(&req, Ipv4Addr::new(10, 0, 0, 254), host);
        assert_eq!(decode(&unreach, host, ID, Timestamp::new(2, 0)), None);
    }

    #[test]
    fn decode_ignores_other_types() {
        let host = Ipv4Addr::new(192, 0, 2, 7);
        let req = build_echo_request(ID, 9, Timestamp::new(1, 0));
        let mut pkt = ipv4_header(host, host, req.len());
        // Um Echo Request de outro ping chegando ao socket
        pkt.extend_from_slice(&req);
        assert_eq!(decode(&pkt, host, ID, Timestamp::new(2, 0)), None);

        let mut pkt = reply_for(&req, host);
        pkt[20] = 11; // Time Exceeded
        assert_eq!(decode(&pkt, host, ID, Timestamp::new(2, 0)), None);
    }

    #[test]
    fn decode_unreachable_reports_original_destination() {
        let router = Ipv4Addr::new(10, 0, 0, 254);
        let dst = Ipv4Addr::new(198, 51, 100, 3);
        let req = build_echo_request(ID, 4, Timestamp::new(1, 0));
        let pkt = unreachable_for(&req, router, dst);

        let event = decode(&pkt, router, ID, Timestamp::new(2, 0));
        assert_eq!(event, Some(Event::Unreachable { host: dst }));
        assert_eq!(event.unwrap().to_string(), "198.51.100.3: unreachable");
    }

    #[test]
    fn decode_unreachable_for_non_echo_is_ignored() {
        let router = Ipv4Addr::new(10, 0, 0, 254);
        let mut req = build_echo_request(ID, 4, Timestamp::new(1, 0));
        req[0] = 13; // Timestamp request
        let pkt = unreachable_for(&req, router, Ipv4Addr::new(198, 51, 100, 3));
        assert_eq!(decode(&pkt, router, ID, Timestamp::new(2, 0)), None);
    }

    #[test]
    fn decode_drops_truncated_buffers() {
        let host = Ipv4Addr::new(192, 0, 2, 7);
        let req = build_echo_request(ID, 9, Timestamp::new(1, 0));

        let reply = reply_for(&req, host);
        for len in 0..reply.len() {
            assert_eq!(decode(&reply[..len], host, ID, Timestamp::new(2, 0)), None, "len={}", len);
        }

        let unreach = unreachable_for(&req, host, host);
        for len in 0..unreach.len() {
            assert_eq!(decode(&unreach[..len], host, ID, Timestamp::new(2, 0)), None, "len={}", len);
        }
    }

    #[test]
    fn decode_rejects_bogus_header_lengths() {
        let host = Ipv4Addr::new(192, 0, 2, 7);
        let req = build_echo_request(ID, 9, Timestamp::new(1, 0));

        let mut reply = reply_for(&req, host);
        reply[0] = 0x42; // IHL=2
        assert_eq!(decode(&reply, host, ID, Timestamp::new(2, 0)), None);

        let mut unreach = unreachable_for(&req, host, host);
        unreach[28] = 0x4F; // IHL interno de 60 bytes, maior que o recebido
        assert_eq!(decode(&unreach, host, ID, Timestamp::new(2, 0)), None);
    }
}
