use super::error::{ParseErrorKind, Result};
use crate::server::controlchan::command::{Command, CommandKind, ModeParam, Opt, StruParam, TypeParam};

use bytes::Bytes;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str;

/// Parse the given bytes (a single CRLF-terminated line) into a [`Command`].
#[allow(clippy::cognitive_complexity)]
pub fn parse<T>(line: T) -> Result<Command>
where
    T: AsRef<[u8]> + Into<Bytes>,
{
    let vec = line.into().to_vec();
    let mut iter = vec.splitn(2, |&b| b == b' ' || b == b'\r' || b == b'\n');
    let cmd_token = normalize(iter.next().unwrap())?;
    let cmd_params = String::from(str::from_utf8(iter.next().unwrap_or(&[]))?);

    let kind = match &*cmd_token {
        "USER" => CommandKind::User {
            username: parse_to_eol(cmd_params)?,
        },
        "PASS" => CommandKind::Pass {
            password: parse_to_eol(cmd_params)?,
        },
        "ACCT" => CommandKind::Acct {
            account: parse_to_eol(cmd_params)?,
        },
        "SYST" => CommandKind::Syst,
        "STAT" => {
            let params = parse_to_eol(cmd_params)?;
            let path = if !params.is_empty() {
                Some(String::from_utf8_lossy(&params).to_string())
            } else {
                None
            };
            CommandKind::Stat { path }
        }
        "TYPE" => {
            let params = parse_to_eol(cmd_params)?;
            let param = match params.first() {
                Some(b'A') | Some(b'a') => TypeParam::Ascii,
                Some(b'E') | Some(b'e') => TypeParam::Ebcdic,
                Some(b'I') | Some(b'i') => TypeParam::Image,
                Some(b'L') | Some(b'l') => {
                    let size = params.get(2).copied().unwrap_or(8);
                    TypeParam::Local(size)
                }
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            };
            CommandKind::Type { param }
        }
        "STRU" => {
            let params = parse_to_eol(cmd_params)?;
            if params.len() > 1 {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            let structure = match params.first() {
                Some(b'F') => StruParam::File,
                Some(b'R') => StruParam::Record,
                Some(b'P') => StruParam::Page,
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            };
            CommandKind::Stru { structure }
        }
        "MODE" => {
            let params = parse_to_eol(cmd_params)?;
            if params.len() > 1 {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            let mode = match params.first() {
                Some(b'S') => ModeParam::Stream,
                Some(b'B') => ModeParam::Block,
                Some(b'C') => ModeParam::Compressed,
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            };
            CommandKind::Mode { mode }
        }
        "HELP" => CommandKind::Help,
        "NOOP" => CommandKind::Noop,
        "PASV" => CommandKind::Pasv,
        "EPSV" => CommandKind::Epsv,
        "PORT" => {
            let params = parse_to_eol(cmd_params)?;
            let addr = parse_port_addr(&params)?;
            CommandKind::Port { addr }
        }
        "RETR" => {
            let path = parse_to_eol(cmd_params)?;
            if path.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Retr {
                path: String::from_utf8_lossy(&path).to_string(),
            }
        }
        "STOR" => {
            let path = parse_to_eol(cmd_params)?;
            if path.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Stor {
                path: String::from_utf8_lossy(&path).to_string(),
            }
        }
        "APPE" => {
            let path = parse_to_eol(cmd_params)?;
            if path.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Appe {
                path: String::from_utf8_lossy(&path).to_string(),
            }
        }
        "LIST" => {
            let line = parse_to_eol(cmd_params)?;
            let path = line
                .split(|&b| b == b' ')
                .filter(|s| !s.is_empty() && !s.starts_with(b"-"))
                .map(|s| String::from_utf8_lossy(s).to_string())
                .next();
            CommandKind::List { path }
        }
        "NLST" => {
            let path = parse_to_eol(cmd_params)?;
            let path = if path.is_empty() { None } else { Some(String::from_utf8_lossy(&path).to_string()) };
            CommandKind::Nlst { path }
        }
        "FEAT" => CommandKind::Feat,
        "PWD" | "XPWD" => CommandKind::Pwd,
        "CWD" | "XCWD" => {
            let path = parse_to_eol(cmd_params)?;
            if path.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Cwd {
                path: String::from_utf8_lossy(&path).to_string().into(),
            }
        }
        "CDUP" | "XCUP" => CommandKind::Cdup,
        "OPTS" => {
            let params = parse_to_eol(cmd_params)?;
            match &params[..] {
                b"UTF8 ON" => CommandKind::Opts { option: Opt::Utf8 { on: true } },
                b"UTF8 OFF" => CommandKind::Opts { option: Opt::Utf8 { on: false } },
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            }
        }
        "DELE" => {
            let path = parse_to_eol(cmd_params)?;
            if path.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Dele {
                path: String::from_utf8_lossy(&path).to_string(),
            }
        }
        "RMD" | "XRMD" => {
            let path = parse_to_eol(cmd_params)?;
            if path.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Rmd {
                path: String::from_utf8_lossy(&path).to_string(),
            }
        }
        "QUIT" => CommandKind::Quit,
        "MKD" | "XMKD" => {
            let params = parse_to_eol(cmd_params)?;
            if params.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Mkd {
                path: String::from_utf8_lossy(&params).to_string().into(),
            }
        }
        "ALLO" => CommandKind::Allo,
        "ABOR" => CommandKind::Abor,
        "STOU" => CommandKind::Stou,
        "RNFR" => {
            let params = parse_to_eol(cmd_params)?;
            if params.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Rnfr {
                path: String::from_utf8_lossy(&params).to_string().into(),
            }
        }
        "RNTO" => {
            let params = parse_to_eol(cmd_params)?;
            if params.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Rnto {
                path: String::from_utf8_lossy(&params).to_string().into(),
            }
        }
        "SIZE" => {
            let params = parse_to_eol(cmd_params)?;
            if params.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Size {
                path: String::from_utf8_lossy(&params).to_string().into(),
            }
        }
        "REST" => {
            let params = parse_to_eol(cmd_params)?;
            let offset = String::from_utf8_lossy(&params)
                .parse::<u64>()
                .map_err(|_| ParseErrorKind::InvalidCommand)?;
            CommandKind::Rest { offset }
        }
        "MDTM" => {
            let params = parse_to_eol(cmd_params)?;
            if params.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            CommandKind::Mdtm {
                path: String::from_utf8_lossy(&params).to_string().into(),
            }
        }
        _ => {
            let params = parse_to_eol(cmd_params)?;
            CommandKind::Other {
                command_name: cmd_token,
                arguments: String::from_utf8_lossy(&params).to_string(),
            }
        }
    };

    Ok(Command::new(kind))
}

/// Parses a `PORT h1,h2,h3,h4,p1,p2` argument into the address the client wants us to connect
/// back to for an active-mode data transfer.
fn parse_port_addr(params: &[u8]) -> Result<SocketAddr> {
    let text = str::from_utf8(params)?;
    let parts: Vec<&str> = text.trim().split(',').collect();
    if parts.len() != 6 {
        return Err(ParseErrorKind::InvalidCommand.into());
    }
    let mut octets = [0u8; 4];
    for (i, octet) in octets.iter_mut().enumerate() {
        *octet = parts[i].parse().map_err(|_| ParseErrorKind::InvalidCommand)?;
    }
    let p1: u8 = parts[4].parse().map_err(|_| ParseErrorKind::InvalidCommand)?;
    let p2: u8 = parts[5].parse().map_err(|_| ParseErrorKind::InvalidCommand)?;
    let port = ((p1 as u16) << 8) | p2 as u16;
    let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

/// Try to parse a buffer of bytes, up to end of line into a `Bytes`.
fn parse_to_eol<T: AsRef<[u8]> + Into<Bytes>>(bytes: T) -> Result<Bytes> {
    let mut pos: usize = 0;
    let mut bytes: Bytes = bytes.into();
    let mut iter = bytes.as_ref().iter();

    loop {
        let b = match iter.next() {
            Some(b) => b,
            _ => return Err(ParseErrorKind::InvalidEol.into()),
        };

        if *b == b'\r' {
            match iter.next() {
                Some(b'\n') => return Ok(bytes.split_to(pos)),
                _ => return Err(ParseErrorKind::InvalidEol.into()),
            }
        }

        if *b == b'\n' {
            return Ok(bytes.split_to(pos));
        }

        pos += 1;
    }
}

fn normalize(token: &[u8]) -> Result<String> {
    Ok(str::from_utf8(token).map(|t| t.to_uppercase())?)
}
