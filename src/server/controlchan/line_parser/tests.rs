use super::parse;
use crate::server::controlchan::command::{CommandKind, ModeParam};

#[test]
fn parses_user() {
    let cmd = parse(&b"USER foo\r\n"[..]).unwrap();
    assert_eq!(cmd.kind, CommandKind::User { username: "foo".into() });
}

#[test]
fn parses_retr_path() {
    let cmd = parse(&b"RETR /a/b.txt\r\n"[..]).unwrap();
    assert_eq!(
        cmd.kind,
        CommandKind::Retr {
            path: "/a/b.txt".to_string()
        }
    );
}

#[test]
fn parses_port_address() {
    let cmd = parse(&b"PORT 127,0,0,1,4,1\r\n"[..]).unwrap();
    match cmd.kind {
        CommandKind::Port { addr } => {
            assert_eq!(addr.ip().to_string(), "127.0.0.1");
            assert_eq!(addr.port(), 4 * 256 + 1);
        }
        other => panic!("expected Port, got {other:?}"),
    }
}

#[test]
fn rejects_malformed_port() {
    assert!(parse(&b"PORT 1,2,3\r\n"[..]).is_err());
}

#[test]
fn parses_mode_block() {
    let cmd = parse(&b"MODE B\r\n"[..]).unwrap();
    assert_eq!(cmd.kind, CommandKind::Mode { mode: ModeParam::Block });
}

#[test]
fn rnfr_sets_extra_next_to_rnto() {
    use crate::server::controlchan::command::CommandCode;
    let cmd = parse(&b"RNFR /a.txt\r\n"[..]).unwrap();
    assert_eq!(cmd.extra_next, Some(CommandCode::Rnto));
}

#[test]
fn unknown_verb_becomes_other() {
    let cmd = parse(&b"FROB x\r\n"[..]).unwrap();
    match cmd.kind {
        CommandKind::Other { command_name, .. } => assert_eq!(command_name, "FROB"),
        other => panic!("expected Other, got {other:?}"),
    }
}

#[test]
fn missing_newline_is_an_error() {
    assert!(parse(&b"NOOP"[..]).is_err());
}
