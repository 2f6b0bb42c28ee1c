//! DNS question extraction from captured frames
//!
//! Walks Ethernet -> IPv4/IPv6 -> UDP/TCP and parses the question
//! section of DNS messages seen on port 53. Responses and non-DNS
//! traffic are skipped; malformed messages bump `parse_errors` and
//! yield nothing.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use log::trace;
use serde::Serialize;

use crate::capture::{PacketRecord, LINKTYPE_ETHERNET};
use crate::errors::DecodeError;
use crate::models::{DnsQuery, RecordType};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

const DNS_PORT: u16 = 53;

/// QR bit of the DNS flags word; clear means query.
const FLAG_RESPONSE: u16 = 0x8000;

/// Cap on compression-pointer jumps in one name. Real messages need a
/// handful; anything deeper is a crafted loop.
const MAX_POINTER_JUMPS: usize = 16;

/// Running counters over everything the extractor has seen.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractorStats {
    pub total_packets: u64,
    pub ip_packets: u64,
    pub udp_packets: u64,
    pub tcp_packets: u64,
    pub dns_packets: u64,
    pub dns_queries: u64,
    pub parse_errors: u64,
}

/// Stateful extractor; counters persist across frames for the lifetime
/// of one pipeline run.
#[derive(Debug, Default)]
pub struct DnsExtractor {
    stats: ExtractorStats,
}

impl DnsExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ExtractorStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ExtractorStats::default();
    }

    /// Extract all DNS questions carried by one captured frame.
    pub fn extract(&mut self, record: &PacketRecord) -> Vec<DnsQuery> {
        self.stats.total_packets += 1;

        if record.link_type != LINKTYPE_ETHERNET {
            return Vec::new();
        }
        let data = &record.data;
        if data.len() < 14 {
            return Vec::new();
        }

        let ethertype = u16::from_be_bytes([data[12], data[13]]);
        match ethertype {
            ETHERTYPE_IPV4 => self.extract_ipv4(record, &data[14..]),
            ETHERTYPE_IPV6 => self.extract_ipv6(record, &data[14..]),
            _ => Vec::new(),
        }
    }

    fn extract_ipv4(&mut self, record: &PacketRecord, ip: &[u8]) -> Vec<DnsQuery> {
        if ip.len() < 20 {
            return Vec::new();
        }
        self.stats.ip_packets += 1;

        let header_len = usize::from(ip[0] & 0x0F) * 4;
        if header_len < 20 || header_len > ip.len() {
            self.stats.parse_errors += 1;
            return Vec::new();
        }

        let protocol = ip[9];
        let src = IpAddr::V4(Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]));
        let dst = IpAddr::V4(Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]));

        match protocol {
            IPPROTO_UDP => self.extract_udp(record, &ip[header_len..], src, dst),
            IPPROTO_TCP => self.extract_tcp(record, &ip[header_len..], src, dst),
            _ => Vec::new(),
        }
    }

    /// Fixed 40-byte IPv6 header; extension headers are not chased.
    fn extract_ipv6(&mut self, record: &PacketRecord, ip: &[u8]) -> Vec<DnsQuery> {
        if ip.len() < 40 {
            return Vec::new();
        }
        self.stats.ip_packets += 1;

        let next_header = ip[6];
        let mut src_bytes = [0u8; 16];
        src_bytes.copy_from_slice(&ip[8..24]);
        let mut dst_bytes = [0u8; 16];
        dst_bytes.copy_from_slice(&ip[24..40]);
        let src = IpAddr::V6(Ipv6Addr::from(src_bytes));
        let dst = IpAddr::V6(Ipv6Addr::from(dst_bytes));

        match next_header {
            IPPROTO_UDP => self.extract_udp(record, &ip[40..], src, dst),
            IPPROTO_TCP => self.extract_tcp(record, &ip[40..], src, dst),
            _ => Vec::new(),
        }
    }

    fn extract_udp(
        &mut self,
        record: &PacketRecord,
        udp: &[u8],
        src: IpAddr,
        dst: IpAddr,
    ) -> Vec<DnsQuery> {
        if udp.len() < 8 {
            return Vec::new();
        }
        self.stats.udp_packets += 1;

        let src_port = u16::from_be_bytes([udp[0], udp[1]]);
        let dst_port = u16::from_be_bytes([udp[2], udp[3]]);
        if src_port != DNS_PORT && dst_port != DNS_PORT {
            return Vec::new();
        }

        self.stats.dns_packets += 1;
        self.parse_dns_message(record, &udp[8..], src, dst)
    }

    /// DNS over a TCP segment: the message is prefixed with a 2-byte
    /// length. Reassembly across segments is out of scope; only what
    /// fits in this segment is parsed.
    fn extract_tcp(
        &mut self,
        record: &PacketRecord,
        tcp: &[u8],
        src: IpAddr,
        dst: IpAddr,
    ) -> Vec<DnsQuery> {
        if tcp.len() < 20 {
            return Vec::new();
        }
        self.stats.tcp_packets += 1;

        let src_port = u16::from_be_bytes([tcp[0], tcp[1]]);
        let dst_port = u16::from_be_bytes([tcp[2], tcp[3]]);
        if src_port != DNS_PORT && dst_port != DNS_PORT {
            return Vec::new();
        }

        self.stats.dns_packets += 1;

        let data_offset = usize::from(tcp[12] >> 4) * 4;
        if data_offset < 20 {
            self.stats.parse_errors += 1;
            return Vec::new();
        }
        if tcp.len() <= data_offset + 2 {
            return Vec::new();
        }

        let declared =
            usize::from(u16::from_be_bytes([tcp[data_offset], tcp[data_offset + 1]]));
        let start = data_offset + 2;
        let end = (start + declared).min(tcp.len());
        self.parse_dns_message(record, &tcp[start..end], src, dst)
    }

    fn parse_dns_message(
        &mut self,
        record: &PacketRecord,
        message: &[u8],
        src: IpAddr,
        dst: IpAddr,
    ) -> Vec<DnsQuery> {
        if message.len() < 12 {
            return Vec::new();
        }

        let flags = u16::from_be_bytes([message[2], message[3]]);
        if flags & FLAG_RESPONSE != 0 {
            return Vec::new();
        }

        let qdcount = u16::from_be_bytes([message[4], message[5]]);
        if qdcount == 0 {
            return Vec::new();
        }

        let mut queries = Vec::new();
        let mut offset = 12usize;
        for _ in 0..qdcount {
            match parse_question(message, offset) {
                Ok((name, qtype, next_offset)) => {
                    offset = next_offset;
                    if name.is_empty() {
                        continue;
                    }
                    trace!("question {} ({})", name, RecordType::from_code(qtype));
                    queries.push(DnsQuery::new(
                        &name,
                        record.timestamp,
                        src,
                        RecordType::from_code(qtype),
                        Some(dst),
                    ));
                    self.stats.dns_queries += 1;
                }
                Err(err) => {
                    // the offset is unreliable after a malformed name;
                    // drop the rest of the question section
                    trace!("question parse failed: {}", err);
                    self.stats.parse_errors += 1;
                    break;
                }
            }
        }

        queries
    }
}

/// Parse one question: a name followed by QTYPE and QCLASS.
fn parse_question(message: &[u8], offset: usize) -> Result<(String, u16, usize), DecodeError> {
    let (name, after_name) = parse_name(message, offset)?;
    let tail = message
        .get(after_name..after_name + 4)
        .ok_or(DecodeError::Truncated)?;
    let qtype = u16::from_be_bytes([tail[0], tail[1]]);
    Ok((name, qtype, after_name + 4))
}

/// Decode a possibly-compressed name starting at `offset`.
///
/// Returns the dotted name and the offset just past the name in the
/// original label stream (pointers do not advance it further).
fn parse_name(message: &[u8], offset: usize) -> Result<(String, usize), DecodeError> {
    let mut name = String::new();
    let mut pos = offset;
    let mut resume_at: Option<usize> = None;
    let mut jumps = 0usize;

    loop {
        let len_byte = *message.get(pos).ok_or(DecodeError::Truncated)?;

        if len_byte == 0 {
            pos += 1;
            break;
        }

        if len_byte & 0xC0 == 0xC0 {
            let second = *message.get(pos + 1).ok_or(DecodeError::Truncated)?;
            let target = (usize::from(len_byte & 0x3F) << 8) | usize::from(second);
            if target >= message.len() {
                return Err(DecodeError::PointerOutOfBounds(target));
            }
            if resume_at.is_none() {
                resume_at = Some(pos + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(DecodeError::PointerLoop);
            }
            pos = target;
            continue;
        }

        if len_byte > 63 {
            return Err(DecodeError::BadLabel(len_byte));
        }

        let label = message
            .get(pos + 1..pos + 1 + usize::from(len_byte))
            .ok_or(DecodeError::Truncated)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(label));
        pos += 1 + usize::from(len_byte);
    }

    Ok((name, resume_at.unwrap_or(pos)))
}
