//! Lease journal (component D): an append-oriented textual store for IPv4
//! leases and the client DUID, periodically compacted.
//!
//! Grammar (whitespace-insensitive, braces nested):
//! ```text
//! default-duid "<colon-hex>";
//! lease { interface "eth0"; fixed-address 192.0.2.50; [bootp;]
//!         [filename ".."; ] [server-name ".."; ] [medium ".."; ]
//!         option <name> <value>; ...
//!         renew W Y/M/D H:M:S; rebind ...; expire ...; }
//! lease6 { ... }   # preserved verbatim, never interpreted (see [`crate`] docs)
//! ```
//!
//! Write discipline: every committed lease is appended immediately and
//! `fflush`ed; after [`COMPACT_AFTER`] appends the whole file is rewritten
//! from a snapshot and the counter resets; `fsync` happens only on
//! release-time writes. Static (config-sourced) leases are never persisted.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, TimeZone, Timelike, Utc};

use crate::clock::AbsTime;
use crate::duid::Duid;
use crate::error::JournalError;
use crate::lease::ClientLease;
use crate::options::OptionStore;
use crate::packet::OptionCode;

/// Appends since the last compaction after which the whole file is rewritten.
pub const COMPACT_AFTER: u32 = 20;

/// The upper bound on how stale the on-disk journal may be relative to
/// committed in-memory state; this crate's writer satisfies it trivially by
/// writing synchronously on every commit.
pub const MIN_LEASE_WRITE: std::time::Duration = std::time::Duration::from_secs(60);

/// One recovered IPv4 lease record, with the interface it belongs to.
#[derive(Debug, Clone)]
pub struct LeaseRecord {
    pub interface: String,
    pub lease: ClientLease,
}

/// Everything recovered from a full parse of the journal at startup.
#[derive(Debug, Default)]
pub struct Recovered {
    pub duid: Option<Duid>,
    pub leases: Vec<LeaseRecord>,
    /// `lease6 { ... }` bodies, preserved verbatim and never interpreted.
    pub lease6_raw: Vec<String>,
}

/// Handle to the on-disk lease database (and optionally a separate DUID
/// file), owning no in-memory lease objects — it is a flat sink.
pub struct Journal {
    path: PathBuf,
    duid_path: Option<PathBuf>,
    file: File,
    appends_since_compact: u32,
}

impl Journal {
    /// Open (creating if absent) the lease database at `path`, and recover
    /// its contents. `duid_path`, if given, is a second file holding only a
    /// `default-duid` statement.
    pub fn open(path: impl AsRef<Path>, duid_path: Option<impl AsRef<Path>>) -> Result<(Self, Recovered), JournalError> {
        let path = path.as_ref().to_path_buf();
        let duid_path = duid_path.map(|p| p.as_ref().to_path_buf());

        let mut recovered = read_and_parse(&path)?;
        if let Some(dp) = &duid_path {
            let from_duid_file = read_and_parse(dp)?;
            if let Some(duid) = from_duid_file.duid {
                recovered.duid = Some(duid);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(|source| JournalError::Io { path: path.clone(), source })?;

        Ok((
            Journal {
                path,
                duid_path,
                file,
                appends_since_compact: 0,
            },
            recovered,
        ))
    }

    /// Append a single lease record. No-op (and no persistence) for static
    /// leases, which are never written to the journal.
    pub fn append_lease(&mut self, interface: &str, lease: &ClientLease) -> Result<(), JournalError> {
        if lease.is_static {
            return Ok(());
        }
        let text = format_lease(interface, lease);
        self.write_and_flush(&text)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Append a lease record and `fsync`, as required at release time.
    pub fn append_lease_synced(&mut self, interface: &str, lease: &ClientLease) -> Result<(), JournalError> {
        self.append_lease(interface, lease)?;
        self.file
            .sync_all()
            .map_err(|source| JournalError::Io { path: self.path.clone(), source })?;
        Ok(())
    }

    /// Whether the next commit should trigger a compaction.
    pub fn needs_compaction(&self) -> bool {
        self.appends_since_compact >= COMPACT_AFTER
    }

    /// Rewrite the whole file from a snapshot of every client's active, new,
    /// and stored leases, plus whatever `lease6` bodies were last recovered.
    /// Resets the append counter.
    pub fn compact(
        &mut self,
        duid: Option<&Duid>,
        snapshot: &[(String, ClientLease)],
        lease6_raw: &[String],
    ) -> Result<(), JournalError> {
        let mut out = String::new();
        if let Some(duid) = duid {
            out.push_str(&format_duid(duid));
        }
        for (interface, lease) in snapshot {
            if lease.is_static {
                continue;
            }
            out.push_str(&format_lease(interface, lease));
        }
        for body in lease6_raw {
            out.push_str("lease6 {");
            out.push_str(body);
            out.push_str("}\n");
        }

        self.file
            .set_len(0)
            .map_err(|source| JournalError::Io { path: self.path.clone(), source })?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|source| JournalError::Io { path: self.path.clone(), source })?;
        self.write_and_flush(&out)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Persist a newly generated DUID to the DUID file (if configured) or
    /// else the main lease file.
    pub fn write_duid(&mut self, duid: &Duid) -> Result<(), JournalError> {
        let text = format_duid(duid);
        if let Some(duid_path) = self.duid_path.clone() {
            let mut f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&duid_path)
                .map_err(|source| JournalError::Io { path: duid_path.clone(), source })?;
            f.write_all(text.as_bytes())
                .map_err(|source| JournalError::Io { path: duid_path, source })?;
            f.flush().map_err(|source| JournalError::Io { path: self.path.clone(), source })
        } else {
            self.write_and_flush(&text)
        }
    }

    fn write_and_flush(&mut self, text: &str) -> Result<(), JournalError> {
        self.file
            .write_all(text.as_bytes())
            .map_err(|source| JournalError::Io { path: self.path.clone(), source })?;
        self.file
            .flush()
            .map_err(|source| JournalError::Io { path: self.path.clone(), source })
    }
}

fn read_and_parse(path: &Path) -> Result<Recovered, JournalError> {
    let mut text = String::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_string(&mut text)
                .map_err(|source| JournalError::Io { path: path.to_path_buf(), source })?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Recovered::default()),
        Err(source) => return Err(JournalError::Io { path: path.to_path_buf(), source }),
    }
    let mut parsed = parse_journal(&text)?;
    dedup_most_recent_wins(&mut parsed.leases);
    Ok(parsed)
}

/// Duplicates (same interface, address, `is_static`) collapse to the last
/// occurrence in file order, which is the most recently written one.
fn dedup_most_recent_wins(leases: &mut Vec<LeaseRecord>) {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<LeaseRecord> = Vec::with_capacity(leases.len());
    for record in leases.drain(..).rev() {
        let key = (record.interface.clone(), record.lease.address, record.lease.is_static);
        if seen.insert(key) {
            out.push(record);
        }
    }
    out.reverse();
    *leases = out;
}

// ---- parsing ----

fn parse_journal(text: &str) -> Result<Recovered, JournalError> {
    let bytes = text.as_bytes();
    let mut i = 0usize;
    let mut out = Recovered::default();

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            break;
        }
        let word = read_word(text, bytes, &mut i)?;
        skip_ws(bytes, &mut i);
        match word.as_str() {
            "default-duid" => {
                let value = read_until_semi(text, bytes, &mut i)?;
                out.duid = Duid::from_bytes(&parse_colon_hex(&value)?);
            }
            "lease" | "lease6" => {
                if bytes.get(i) != Some(&b'{') {
                    return Err(JournalError::Parse(format!("expected '{{' after {word}")));
                }
                i += 1;
                let body_start = i;
                let body_end = find_matching_brace(text, bytes, &mut i)?;
                let body = &text[body_start..body_end];
                if word == "lease" {
                    out.leases.push(parse_lease_body(body)?);
                } else {
                    out.lease6_raw.push(body.to_string());
                }
            }
            other => return Err(JournalError::Parse(format!("unknown statement '{other}'"))),
        }
    }
    Ok(out)
}

fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn read_word(text: &str, bytes: &[u8], i: &mut usize) -> Result<String, JournalError> {
    let start = *i;
    while *i < bytes.len() && is_word_char(bytes[*i]) {
        *i += 1;
    }
    if start == *i {
        return Err(JournalError::Parse(format!(
            "expected a keyword near byte {start}"
        )));
    }
    Ok(text[start..*i].to_string())
}

/// Reads a (possibly quoted) value up to, and consuming, the next `;`.
fn read_until_semi(text: &str, bytes: &[u8], i: &mut usize) -> Result<String, JournalError> {
    let start = *i;
    while *i < bytes.len() && bytes[*i] != b';' {
        if bytes[*i] == b'"' {
            *i += 1;
            while *i < bytes.len() && bytes[*i] != b'"' {
                *i += 1;
            }
        }
        *i += 1;
    }
    if *i >= bytes.len() {
        return Err(JournalError::Parse("unterminated statement".into()));
    }
    let raw = text[start..*i].trim();
    *i += 1; // consume ';'
    Ok(strip_quotes(raw))
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Finds the `}` matching the `{` already consumed just before `*i`,
/// returning the byte offset of that `}` and leaving `*i` just past it.
/// Quoted strings are skipped so braces inside them don't count.
fn find_matching_brace(text: &str, bytes: &[u8], i: &mut usize) -> Result<usize, JournalError> {
    let mut depth = 1i32;
    while *i < bytes.len() {
        match bytes[*i] {
            b'"' => {
                *i += 1;
                while *i < bytes.len() && bytes[*i] != b'"' {
                    *i += 1;
                }
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = *i;
                    *i += 1;
                    return Ok(end);
                }
            }
            _ => {}
        }
        *i += 1;
    }
    let _ = text;
    Err(JournalError::Parse("unterminated block".into()))
}

/// Splits on whitespace, keeping quoted segments as one (unquoted) token.
fn split_ws_respecting_quotes(s: &str) -> Vec<String> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut out = Vec::new();
    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        if bytes[i] == b'"' {
            let start = i + 1;
            i += 1;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            out.push(s[start..i].to_string());
            i += 1;
        } else {
            let start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            out.push(s[start..i].to_string());
        }
    }
    out
}

fn parse_lease_body(body: &str) -> Result<LeaseRecord, JournalError> {
    let mut interface = None;
    let mut address = None;
    let mut is_bootp = false;
    let mut filename = None;
    let mut server_name = None;
    let mut medium = None;
    let mut options = OptionStore::new();
    let mut renew = None;
    let mut rebind = None;
    let mut expire = None;

    for stmt in split_statements(body) {
        let tokens = split_ws_respecting_quotes(&stmt);
        let Some(keyword) = tokens.first() else { continue };
        match keyword.as_str() {
            "interface" => interface = tokens.get(1).cloned(),
            "fixed-address" => address = tokens.get(1).map(|s| parse_ipv4(s)).transpose()?,
            "bootp" => is_bootp = true,
            "filename" => filename = tokens.get(1).cloned(),
            "server-name" => server_name = tokens.get(1).cloned(),
            "medium" => medium = tokens.get(1).cloned(),
            "option" => {
                let name = tokens.get(1).cloned().ok_or_else(|| {
                    JournalError::Parse("option statement missing name".into())
                })?;
                let value = tokens[2..].join(" ");
                options.save(
                    crate::options::Universe::Dhcp,
                    option_code_for_name(&name),
                    crate::options::OptionValue::Raw(value.into_bytes()),
                );
            }
            "renew" => renew = Some(parse_datetime(&tokens)?),
            "rebind" => rebind = Some(parse_datetime(&tokens)?),
            "expire" => expire = Some(parse_datetime(&tokens)?),
            other => return Err(JournalError::Parse(format!("unknown lease field '{other}'"))),
        }
    }

    let interface = interface.ok_or_else(|| JournalError::Parse("lease missing interface".into()))?;
    let address = address.ok_or_else(|| JournalError::Parse("lease missing fixed-address".into()))?;

    Ok(LeaseRecord {
        interface,
        lease: ClientLease {
            address,
            next_server: [0; 4],
            options,
            server_name,
            boot_file_name: filename,
            is_bootp,
            is_static: false,
            medium,
            renewal: renew.unwrap_or(AbsTime::ZERO),
            rebind: rebind.unwrap_or(AbsTime::ZERO),
            expiry: expire.unwrap_or(AbsTime::ZERO),
        },
    })
}

/// Splits a lease body into `;`-terminated statements, quote-aware.
fn split_statements(body: &str) -> Vec<String> {
    let bytes = body.as_bytes();
    let mut i = 0;
    let mut out = Vec::new();
    let mut start = 0;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            i += 1;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
        } else if bytes[i] == b';' {
            let s = body[start..i].trim();
            if !s.is_empty() {
                out.push(s.to_string());
            }
            start = i + 1;
        }
        i += 1;
    }
    out
}

fn option_code_for_name(name: &str) -> u8 {
    // Options are written out by their canonical name (see script.rs for the
    // same name table used in the script-runner environment); round-tripping
    // through the journal keys on whatever code that name maps back to, or
    // an unused-but-stable code derived from the name if unrecognized.
    match name {
        "subnet-mask" => OptionCode::SubnetMask.into(),
        "routers" => OptionCode::Router.into(),
        "domain-name-servers" => OptionCode::DomainNameServers.into(),
        "domain-name" => OptionCode::DomainName.into(),
        "broadcast-address" => OptionCode::BroadcastAddress.into(),
        "host-name" => OptionCode::HostName.into(),
        "dhcp-server-identifier" => OptionCode::ServerIdentifier.into(),
        "dhcp-lease-time" => OptionCode::IpAddressLeaseTime.into(),
        "dhcp-renewal-time" => OptionCode::RenewalTime.into(),
        "dhcp-rebinding-time" => OptionCode::RebindingTime.into(),
        _ => 224, // site-local/unrecognized catch-all code
    }
}

fn parse_ipv4(s: &str) -> Result<[u8; 4], JournalError> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return Err(JournalError::Parse(format!("bad IPv4 address '{s}'")));
    }
    let mut out = [0u8; 4];
    for (i, p) in parts.iter().enumerate() {
        out[i] = p
            .parse()
            .map_err(|_| JournalError::Parse(format!("bad IPv4 address '{s}'")))?;
    }
    Ok(out)
}

fn parse_colon_hex(s: &str) -> Result<Vec<u8>, JournalError> {
    s.split(':')
        .map(|part| u8::from_str_radix(part, 16).map_err(|_| JournalError::Parse(format!("bad hex byte '{part}'"))))
        .collect()
}

fn parse_datetime(tokens: &[String]) -> Result<AbsTime, JournalError> {
    let date = tokens
        .get(2)
        .ok_or_else(|| JournalError::Parse("time statement missing date".into()))?;
    let time = tokens
        .get(3)
        .ok_or_else(|| JournalError::Parse("time statement missing time-of-day".into()))?;
    let date_parts: Vec<i32> = date
        .split('/')
        .map(|p| p.parse().map_err(|_| JournalError::Parse(format!("bad date '{date}'"))))
        .collect::<Result<_, _>>()?;
    let time_parts: Vec<u32> = time
        .split(':')
        .map(|p| p.parse().map_err(|_| JournalError::Parse(format!("bad time '{time}'"))))
        .collect::<Result<_, _>>()?;
    let (&[y, m, d], &[hh, mm, ss]) = (date_parts.as_slice(), time_parts.as_slice()) else {
        return Err(JournalError::Parse("malformed date/time".into()));
    };
    let dt = Utc
        .with_ymd_and_hms(y, m as u32, d as u32, hh, mm, ss)
        .single()
        .ok_or_else(|| JournalError::Parse(format!("invalid date/time '{date} {time}'")))?;
    Ok(AbsTime::from_secs(dt.timestamp().max(0) as u64))
}

// ---- formatting ----

fn format_duid(duid: &Duid) -> String {
    let hex: Vec<String> = duid.to_bytes().iter().map(|b| format!("{b:02x}")).collect();
    format!("default-duid \"{}\";\n", hex.join(":"))
}

fn format_lease(interface: &str, lease: &ClientLease) -> String {
    let mut out = String::new();
    out.push_str("lease {\n");
    out.push_str(&format!("  interface \"{interface}\";\n"));
    out.push_str(&format!("  fixed-address {};\n", format_ipv4(lease.address)));
    if lease.is_bootp {
        out.push_str("  bootp;\n");
    }
    if let Some(f) = &lease.boot_file_name {
        out.push_str(&format!("  filename \"{f}\";\n"));
    }
    if let Some(s) = &lease.server_name {
        out.push_str(&format!("  server-name \"{s}\";\n"));
    }
    if let Some(m) = &lease.medium {
        out.push_str(&format!("  medium \"{m}\";\n"));
    }
    for (code, value) in lease.options.iter_universe(&crate::options::Universe::Dhcp) {
        if let Some(name) = option_name_for_code(code) {
            if let crate::options::OptionValue::Raw(bytes) = value {
                if let Ok(s) = std::str::from_utf8(bytes) {
                    out.push_str(&format!("  option {name} \"{s}\";\n"));
                }
            }
        }
    }
    out.push_str(&format!("  renew {};\n", format_datetime(lease.renewal)));
    out.push_str(&format!("  rebind {};\n", format_datetime(lease.rebind)));
    out.push_str(&format!("  expire {};\n", format_datetime(lease.expiry)));
    out.push_str("}\n");
    out
}

fn option_name_for_code(code: u8) -> Option<&'static str> {
    match OptionCode::from(code) {
        OptionCode::SubnetMask => Some("subnet-mask"),
        OptionCode::Router => Some("routers"),
        OptionCode::DomainNameServers => Some("domain-name-servers"),
        OptionCode::DomainName => Some("domain-name"),
        OptionCode::BroadcastAddress => Some("broadcast-address"),
        OptionCode::HostName => Some("host-name"),
        OptionCode::ServerIdentifier => Some("dhcp-server-identifier"),
        OptionCode::IpAddressLeaseTime => Some("dhcp-lease-time"),
        OptionCode::RenewalTime => Some("dhcp-renewal-time"),
        OptionCode::RebindingTime => Some("dhcp-rebinding-time"),
        _ => None,
    }
}

fn format_ipv4(addr: [u8; 4]) -> String {
    format!("{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3])
}

fn format_datetime(t: AbsTime) -> String {
    let dt = Utc.timestamp_opt(t.as_secs() as i64, 0).single().unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    // ISC weekday numbering: 0 = Sunday .. 6 = Saturday.
    let weekday = dt.weekday().num_days_from_sunday();
    format!(
        "{} {}/{}/{} {:02}:{:02}:{:02}",
        weekday,
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile_test_support::TempPath;

    mod tempfile_test_support {
        use std::path::{Path, PathBuf};

        /// Minimal scratch-file helper so journal tests don't need a real
        /// tempfile crate dependency: a path under `std::env::temp_dir()`
        /// removed on drop.
        pub struct TempPath(PathBuf);

        impl TempPath {
            pub fn new(name: &str) -> Self {
                let mut p = std::env::temp_dir();
                p.push(format!("dhcp4-core-test-{}-{}-{:?}", name, std::process::id(), std::time::SystemTime::now()));
                TempPath(p)
            }
        }

        impl AsRef<Path> for TempPath {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    fn sample_lease() -> ClientLease {
        let mut options = OptionStore::new();
        options.save(
            crate::options::Universe::Dhcp,
            OptionCode::SubnetMask.into(),
            crate::options::OptionValue::Raw(b"255.255.255.0".to_vec()),
        );
        ClientLease {
            address: [192, 0, 2, 50],
            next_server: [0; 4],
            options,
            server_name: None,
            boot_file_name: None,
            is_bootp: false,
            is_static: false,
            medium: None,
            renewal: AbsTime::from_secs(1_700_000_300),
            rebind: AbsTime::from_secs(1_700_000_525),
            expiry: AbsTime::from_secs(1_700_000_600),
        }
    }

    #[test]
    fn format_then_parse_round_trips_a_lease() {
        let lease = sample_lease();
        let text = format_lease("eth0", &lease);
        let parsed = parse_journal(&text).unwrap();
        assert_eq!(parsed.leases.len(), 1);
        assert_eq!(parsed.leases[0].interface, "eth0");
        assert_eq!(parsed.leases[0].lease.address, [192, 0, 2, 50]);
        assert_eq!(parsed.leases[0].lease.renewal, lease.renewal);
        assert_eq!(parsed.leases[0].lease.rebind, lease.rebind);
        assert_eq!(parsed.leases[0].lease.expiry, lease.expiry);
    }

    #[test]
    fn lease6_blocks_are_preserved_verbatim() {
        let text = "lease6 { interface \"eth0\"; ia-na 1 { iaaddr ::1 { } } }\n";
        let parsed = parse_journal(text).unwrap();
        assert_eq!(parsed.lease6_raw.len(), 1);
        assert!(parsed.lease6_raw[0].contains("ia-na"));
    }

    #[test]
    fn duplicate_leases_keep_most_recent() {
        let mut text = String::new();
        let mut lease = sample_lease();
        text.push_str(&format_lease("eth0", &lease));
        lease.renewal = AbsTime::from_secs(2_000_000_300);
        text.push_str(&format_lease("eth0", &lease));
        let parsed = parse_journal(&text).unwrap();
        let mut recovered = parsed;
        dedup_most_recent_wins(&mut recovered.leases);
        assert_eq!(recovered.leases.len(), 1);
        assert_eq!(recovered.leases[0].lease.renewal, AbsTime::from_secs(2_000_000_300));
    }

    #[test]
    fn static_leases_are_never_appended() {
        let path = TempPath::new("static");
        let (mut journal, _) = Journal::open(&path, None::<&Path>).unwrap();
        let mut lease = sample_lease();
        lease.is_static = true;
        journal.append_lease("eth0", &lease).unwrap();
        drop(journal);
        let recovered = read_and_parse(path.as_ref()).unwrap();
        assert!(recovered.leases.is_empty());
    }

    #[test]
    fn append_then_reopen_recovers_the_lease() {
        let path = TempPath::new("recover");
        let lease = sample_lease();
        {
            let (mut journal, _) = Journal::open(&path, None::<&Path>).unwrap();
            journal.append_lease("eth0", &lease).unwrap();
        }
        let (_journal, recovered) = Journal::open(&path, None::<&Path>).unwrap();
        assert_eq!(recovered.leases.len(), 1);
        assert_eq!(recovered.leases[0].lease.address, lease.address);
    }

    #[test]
    fn compaction_resets_the_append_counter() {
        let path = TempPath::new("compact");
        let (mut journal, _) = Journal::open(&path, None::<&Path>).unwrap();
        let lease = sample_lease();
        for _ in 0..COMPACT_AFTER {
            journal.append_lease("eth0", &lease).unwrap();
        }
        assert!(journal.needs_compaction());
        journal.compact(None, &[("eth0".to_string(), lease)], &[]).unwrap();
        assert!(!journal.needs_compaction());
    }

    #[test]
    fn duid_round_trips_through_the_journal() {
        let path = TempPath::new("duid");
        let duid = Duid::new_ll(&[2, 0, 0, 0, 0, 1]);
        let (mut journal, _) = Journal::open(&path, None::<&Path>).unwrap();
        journal.write_duid(&duid).unwrap();
        drop(journal);
        let (_journal, recovered) = Journal::open(&path, None::<&Path>).unwrap();
        assert_eq!(recovered.duid, Some(duid));
    }
}
