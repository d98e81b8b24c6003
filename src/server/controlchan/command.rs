//! The FTP command vocabulary and the sequencing rules that govern which command may follow
//! which.

use bytes::Bytes;
use std::{fmt, net::SocketAddr, path::PathBuf};

/// A parsed FTP command together with its arguments.
///
/// `extra_next` overrides the catalog's [`CommandCode::successors`] for exactly the command that
/// follows this one. Only `RNFR` sets it, forcing `RNTO` as the sole admissible successor so a
/// stray command between the two can't silently drop the pending rename.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Command {
    /// The parsed command data.
    pub kind: CommandKind,
    /// Overrides the successor set for the command that follows this one, if `Some`.
    pub extra_next: Option<CommandCode>,
}

impl Command {
    /// Wraps `kind` with no successor override.
    pub fn new(kind: CommandKind) -> Self {
        let extra_next = match kind {
            CommandKind::Rnfr { .. } => Some(CommandCode::Rnto),
            _ => None,
        };
        Command { kind, extra_next }
    }

    /// The tag of the wrapped command, used for sequencing and metrics.
    pub fn code(&self) -> CommandCode {
        self.kind.code()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.kind, f)
    }
}

/// The data-carrying FTP command instance, one variant per supported verb.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CommandKind {
    /// `USER <username>`
    User {
        /// The bytes making up the actual username.
        username: Bytes,
    },
    /// `PASS <password>`
    Pass {
        /// The bytes making up the actual password.
        password: Bytes,
    },
    /// `ACCT <account>`
    Acct {
        /// The bytes making up the account being supplied.
        account: Bytes,
    },
    /// `SYST`
    Syst,
    /// `STAT [path]`
    Stat {
        /// The path about which information is requested, if given.
        path: Option<String>,
    },
    /// `TYPE <type-code> [form-code]`
    Type {
        /// The requested representation type.
        param: TypeParam,
    },
    /// `STRU <structure-code>`
    Stru {
        /// The requested file structure.
        structure: StruParam,
    },
    /// `MODE <mode-code>`
    Mode {
        /// The requested transfer mode.
        mode: ModeParam,
    },
    /// `HELP [command]`
    Help,
    /// `NOOP`
    Noop,
    /// `PASV`
    Pasv,
    /// `EPSV`
    Epsv,
    /// `PORT <host-port>`
    Port {
        /// The address the client wants the server to connect back to.
        addr: SocketAddr,
    },
    /// `RETR <path>`
    Retr {
        /// The path to the file the client would like to retrieve.
        path: String,
    },
    /// `STOR <path>`
    Stor {
        /// The path to the file the client would like to store.
        path: String,
    },
    /// `LIST [path]`
    List {
        /// The path of the file/directory the client wants to list.
        path: Option<String>,
    },
    /// `NLST [path]`
    Nlst {
        /// The path of the file/directory the client wants to list.
        path: Option<String>,
    },
    /// `FEAT`
    Feat,
    /// `PWD`
    Pwd,
    /// `CWD <path>`
    Cwd {
        /// The path the client would like to change directory to.
        path: PathBuf,
    },
    /// `CDUP`
    Cdup,
    /// `OPTS <option>`
    Opts {
        /// The option the client wants to set.
        option: Opt,
    },
    /// `DELE <path>`
    Dele {
        /// The (regular) file to delete.
        path: String,
    },
    /// `RMD <path>`
    Rmd {
        /// The (regular) directory to delete.
        path: String,
    },
    /// `QUIT`
    Quit,
    /// `MKD <path>`
    Mkd {
        /// The path to the directory the client wants to create.
        path: PathBuf,
    },
    /// `ALLO`
    Allo,
    /// `ABOR`
    Abor,
    /// `STOU`
    Stou,
    /// `RNFR <path>`
    Rnfr {
        /// The file to be renamed.
        path: PathBuf,
    },
    /// `RNTO <path>`
    Rnto {
        /// The filename to rename to.
        path: PathBuf,
    },
    /// `SIZE <path>`
    Size {
        /// The file whose size is requested.
        path: PathBuf,
    },
    /// `REST <offset>`
    Rest {
        /// The byte offset to resume a subsequent `STOR`/`RETR`/`APPE` from.
        offset: u64,
    },
    /// `MDTM <path>`
    Mdtm {
        /// The file whose modification time is requested.
        path: PathBuf,
    },
    /// `APPE <path>`
    Appe {
        /// The path to the file the client would like to append to.
        path: String,
    },
    /// A command the catalog doesn't recognize (`502`) or whose syntax it rejects (`501`).
    Other {
        /// The (normalized, uppercased) command verb.
        command_name: String,
        /// The raw, unparsed argument string.
        arguments: String,
    },
}

impl CommandKind {
    /// The tag of this command.
    pub fn code(&self) -> CommandCode {
        match self {
            CommandKind::User { .. } => CommandCode::User,
            CommandKind::Pass { .. } => CommandCode::Pass,
            CommandKind::Acct { .. } => CommandCode::Acct,
            CommandKind::Syst => CommandCode::Syst,
            CommandKind::Stat { .. } => CommandCode::Stat,
            CommandKind::Type { .. } => CommandCode::Type,
            CommandKind::Stru { .. } => CommandCode::Stru,
            CommandKind::Mode { .. } => CommandCode::Mode,
            CommandKind::Help => CommandCode::Help,
            CommandKind::Noop => CommandCode::Noop,
            CommandKind::Pasv => CommandCode::Pasv,
            CommandKind::Epsv => CommandCode::Epsv,
            CommandKind::Port { .. } => CommandCode::Port,
            CommandKind::Retr { .. } => CommandCode::Retr,
            CommandKind::Stor { .. } => CommandCode::Stor,
            CommandKind::List { .. } => CommandCode::List,
            CommandKind::Nlst { .. } => CommandCode::Nlst,
            CommandKind::Feat => CommandCode::Feat,
            CommandKind::Pwd => CommandCode::Pwd,
            CommandKind::Cwd { .. } => CommandCode::Cwd,
            CommandKind::Cdup => CommandCode::Cdup,
            CommandKind::Opts { .. } => CommandCode::Opts,
            CommandKind::Dele { .. } => CommandCode::Dele,
            CommandKind::Rmd { .. } => CommandCode::Rmd,
            CommandKind::Quit => CommandCode::Quit,
            CommandKind::Mkd { .. } => CommandCode::Mkd,
            CommandKind::Allo => CommandCode::Allo,
            CommandKind::Abor => CommandCode::Abor,
            CommandKind::Stou => CommandCode::Stou,
            CommandKind::Rnfr { .. } => CommandCode::Rnfr,
            CommandKind::Rnto { .. } => CommandCode::Rnto,
            CommandKind::Size { .. } => CommandCode::Size,
            CommandKind::Rest { .. } => CommandCode::Rest,
            CommandKind::Mdtm { .. } => CommandCode::Mdtm,
            CommandKind::Appe { .. } => CommandCode::Appe,
            CommandKind::Other { .. } => CommandCode::Other,
        }
    }
}

/// `TYPE` representation types (`TYPE A`, `TYPE I`, ...). Only `Ascii` and `Image` carry through
/// to the codec pipeline; `Ebcdic`/`Local` are accepted syntactically (so `TYPE` never breaks a
/// scripted client) but behave like `Image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeParam {
    /// `TYPE A` - network ASCII text.
    Ascii,
    /// `TYPE E` - EBCDIC text.
    Ebcdic,
    /// `TYPE I` - image (binary), the default and by far the common case.
    Image,
    /// `TYPE L <byte-size>` - local byte size.
    Local(u8),
}

/// `STRU` file structure (`STRU F`, `STRU R`, `STRU P`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StruParam {
    /// No record structure (the default).
    File,
    /// Record structure.
    Record,
    /// Page structure. Accepted syntactically; the data pipeline has no page codec and a later
    /// transfer will fail with `551`.
    Page,
}

/// `MODE` transfer mode (`MODE S`, `MODE B`, `MODE C`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeParam {
    /// Stream mode (the default): raw bytes, EOF signaled by closing the data connection.
    Stream,
    /// Block mode: length-prefixed blocks carrying their own EOR/EOF markers.
    Block,
    /// Compressed mode: a simple run-length encoding layered on top of stream framing.
    Compressed,
}

/// `OPTS` sub-options understood by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opt {
    /// `OPTS UTF8 ON|OFF`. UTF-8 paths are always used; this only affects the confirmation
    /// reply, since there is no legacy encoding mode to fall back to.
    Utf8 {
        /// Whether the client asked to turn UTF-8 support on.
        on: bool,
    },
}

/// The tag of an FTP command, independent of its arguments. Used for successor-set sequencing
/// and for metrics, where carrying the full argument payload would be noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// A pseudo-code representing "just connected, nothing sent yet".
    Connect,
    User,
    Pass,
    Acct,
    Syst,
    Stat,
    Type,
    Stru,
    Mode,
    Help,
    Noop,
    Pasv,
    Epsv,
    Port,
    Retr,
    Stor,
    List,
    Nlst,
    Feat,
    Pwd,
    Cwd,
    Cdup,
    Opts,
    Dele,
    Rmd,
    Quit,
    Mkd,
    Allo,
    Abor,
    Stou,
    Rnfr,
    Rnto,
    Size,
    Rest,
    Mdtm,
    Appe,
    /// A verb the catalog doesn't implement at all.
    Other,
}

impl CommandCode {
    /// Whether this command is admissible regardless of the previous command (`QUIT`, `ABOR`,
    /// `STAT`, `NOOP`).
    pub fn is_special(self) -> bool {
        matches!(self, CommandCode::Quit | CommandCode::Abor | CommandCode::Stat | CommandCode::Noop)
    }

    /// The closed set of commands legally admissible immediately after `self`. An empty slice
    /// means unrestricted (any command may follow).
    pub fn successors(self) -> &'static [CommandCode] {
        use CommandCode::*;
        match self {
            Connect => &[User, Help, Quit],
            User => &[Pass, User, Quit],
            Pass => &[], // unrestricted once logged in
            Acct => &[],
            Rnfr => &[Rnto],
            Rest => &[Retr, Stor, Stou, Appe],
            Port | Pasv | Epsv => &[Retr, Stor, Stou, Appe, List, Nlst],
            _ => &[], // MODE/TYPE/STRU and everything post-login: unrestricted
        }
    }

    /// Whether `next` is admissible immediately after `self` was the most recent command,
    /// applying `override_next` (from [`Command::extra_next`] of the previous command) ahead of
    /// the static catalog.
    pub fn admits(self, next: CommandCode, override_next: Option<CommandCode>) -> bool {
        if next.is_special() {
            return true;
        }
        if let Some(forced) = override_next {
            return next == forced;
        }
        let successors = self.successors();
        successors.is_empty() || successors.contains(&next)
    }
}
