//! Binary RPC wire format
//!
//! Every request and response begins with the signature `nzb1` (0x6E7A6231).
//! The protocol uses exactly two data types: 32-bit integers in network byte
//! order and NUL-terminated char strings. 64-bit values travel split into two
//! 32-bit halves. Variable-length trailing strings are 4-byte aligned: the
//! stored length is increased by the zero-filled padding.
//!
//! One request per TCP connection; the server answers and closes.

use crate::error::{Error, Result};

/// Protocol signature: `nzb1`.
pub const SIGNATURE: u32 = 0x6E7A6231;

/// Fixed size of username/password fields.
pub const CRED_SIZE: usize = 32;

/// Fixed size of filename/category/pattern fields.
pub const NAME_SIZE: usize = 512;

/// Size of the request header (signature + struct_size + type + creds).
pub const REQUEST_HEADER_SIZE: usize = 12 + CRED_SIZE * 2;

/// Request type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RequestKind {
    /// Enqueue an NZB body or URL
    Download = 1,
    /// Flip a pause register
    PauseUnpause = 2,
    /// Dump queue and server state
    List = 3,
    /// Set the rate limit
    SetDownloadRate = 4,
    /// Write diagnostics to the log
    DumpDebug = 5,
    /// Edit the queue
    EditQueue = 6,
    /// Retrieve log lines
    Log = 7,
    /// Terminate the server
    Shutdown = 8,
    /// Re-read configuration
    Reload = 9,
    /// Version string
    Version = 10,
    /// Post-processing queue
    PostQueue = 11,
    /// Append a user log message
    WriteLog = 12,
    /// Scan the incoming directory
    Scan = 13,
    /// Job history
    History = 14,
}

impl RequestKind {
    /// Decode a wire type code.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            1 => RequestKind::Download,
            2 => RequestKind::PauseUnpause,
            3 => RequestKind::List,
            4 => RequestKind::SetDownloadRate,
            5 => RequestKind::DumpDebug,
            6 => RequestKind::EditQueue,
            7 => RequestKind::Log,
            8 => RequestKind::Shutdown,
            9 => RequestKind::Reload,
            10 => RequestKind::Version,
            11 => RequestKind::PostQueue,
            12 => RequestKind::WriteLog,
            13 => RequestKind::Scan,
            14 => RequestKind::History,
            _ => return None,
        })
    }
}

/// Pause register codes for the PauseUnpause request.
pub mod pause_action {
    /// Download queue
    pub const DOWNLOAD: i32 = 1;
    /// Post-processor queue
    pub const POST_PROCESS: i32 = 2;
    /// Incoming-directory scan
    pub const SCAN: i32 = 3;
}

/// Match mode codes for List and EditQueue.
pub mod match_mode {
    /// Match by id
    pub const ID: i32 = 1;
    /// Match by name
    pub const NAME: i32 = 2;
    /// Match by regular expression
    pub const REGEX: i32 = 3;
}

/// EditQueue action codes.
pub mod edit_action {
    /// Move files by offset
    pub const FILE_MOVE_OFFSET: i32 = 1;
    /// Move files to the top
    pub const FILE_MOVE_TOP: i32 = 2;
    /// Move files to the bottom
    pub const FILE_MOVE_BOTTOM: i32 = 3;
    /// Pause files
    pub const FILE_PAUSE: i32 = 4;
    /// Resume files
    pub const FILE_RESUME: i32 = 5;
    /// Delete files
    pub const FILE_DELETE: i32 = 6;
    /// Pause all par files of the owning groups
    pub const FILE_PAUSE_ALL_PARS: i32 = 7;
    /// Pause extra (non-smallest) par files
    pub const FILE_PAUSE_EXTRA_PARS: i32 = 8;
    /// Split the listed files into a new group (text = new name)
    pub const FILE_SPLIT: i32 = 9;
    /// Move groups by offset
    pub const GROUP_MOVE_OFFSET: i32 = 21;
    /// Move groups to the top
    pub const GROUP_MOVE_TOP: i32 = 22;
    /// Move groups to the bottom
    pub const GROUP_MOVE_BOTTOM: i32 = 23;
    /// Pause groups
    pub const GROUP_PAUSE: i32 = 24;
    /// Resume groups
    pub const GROUP_RESUME: i32 = 25;
    /// Delete groups
    pub const GROUP_DELETE: i32 = 26;
    /// Pause all par files
    pub const GROUP_PAUSE_ALL_PARS: i32 = 27;
    /// Pause extra par files
    pub const GROUP_PAUSE_EXTRA_PARS: i32 = 28;
    /// Set the category (text = category)
    pub const GROUP_SET_CATEGORY: i32 = 29;
    /// Set the category and move partial output on disk
    pub const GROUP_APPLY_CATEGORY: i32 = 30;
    /// Merge source groups into the first listed group
    pub const GROUP_MERGE: i32 = 31;
    /// Set a post-processing parameter (text = `key=value`)
    pub const GROUP_SET_PARAMETER: i32 = 32;
    /// Rename the group (text = new name)
    pub const GROUP_SET_NAME: i32 = 33;
    /// Reset the priority (text = number)
    pub const GROUP_SET_PRIORITY: i32 = 34;
}

// ---- low-level codec -----------------------------------------------------

/// Sequential reader over a received byte buffer.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Wrap a buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read one network-order i32.
    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 64-bit value stored as (lo, hi) halves.
    pub fn read_u64_lo_hi(&mut self) -> Result<u64> {
        let lo = self.read_i32()? as u32 as u64;
        let hi = self.read_i32()? as u32 as u64;
        Ok((hi << 32) | lo)
    }

    /// Read a fixed-size NUL-padded string field.
    pub fn read_fixed_string(&mut self, size: usize) -> Result<String> {
        let bytes = self.read_bytes(size)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(size);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Read a trailing string of `stored_len` bytes (content + NUL +
    /// alignment padding).
    pub fn read_padded_string(&mut self, stored_len: usize) -> Result<String> {
        let bytes = self.read_bytes(stored_len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Read `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::RpcProtocol(format!(
                "truncated message: wanted {n} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// Sequential writer producing a wire buffer.
#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Fresh empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write one network-order i32.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a 64-bit value as (lo, hi) halves.
    pub fn write_u64_lo_hi(&mut self, value: u64) {
        self.write_i32(value as u32 as i32);
        self.write_i32((value >> 32) as u32 as i32);
    }

    /// Write a fixed-size NUL-padded string field (truncated if needed,
    /// always NUL-terminated).
    pub fn write_fixed_string(&mut self, value: &str, size: usize) {
        let mut field = vec![0u8; size];
        let bytes = value.as_bytes();
        let copy = bytes.len().min(size - 1);
        field[..copy].copy_from_slice(&bytes[..copy]);
        self.buf.extend_from_slice(&field);
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Finish and return the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// NUL-terminate and pad a string to 4-byte alignment. Returns the padded
/// bytes; the stored length is the padded byte count.
pub fn pad_string(value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
}

// ---- requests ------------------------------------------------------------

/// Parsed request header.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    /// Declared size of the whole fixed struct
    pub struct_size: u32,
    /// Request type
    pub kind: RequestKind,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl RequestHeader {
    /// Parse the header from the first [`REQUEST_HEADER_SIZE`] bytes.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(buf);
        let signature = reader.read_i32()? as u32;
        if signature != SIGNATURE {
            return Err(Error::RpcProtocol(format!(
                "bad signature {signature:#010x}"
            )));
        }
        let struct_size = reader.read_i32()? as u32;
        let raw_kind = reader.read_i32()?;
        let kind = RequestKind::from_i32(raw_kind)
            .ok_or_else(|| Error::RpcProtocol(format!("unknown request type {raw_kind}")))?;
        let username = reader.read_fixed_string(CRED_SIZE)?;
        let password = reader.read_fixed_string(CRED_SIZE)?;
        Ok(Self {
            struct_size,
            kind,
            username,
            password,
        })
    }

    /// Encode a request header (client side).
    pub fn encode(
        writer: &mut WireWriter,
        struct_size: u32,
        kind: RequestKind,
        username: &str,
        password: &str,
    ) {
        writer.write_i32(SIGNATURE as i32);
        writer.write_i32(struct_size as i32);
        writer.write_i32(kind as i32);
        writer.write_fixed_string(username, CRED_SIZE);
        writer.write_fixed_string(password, CRED_SIZE);
    }
}

/// Download request (type 1).
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    /// NZB filename; may be empty for URL downloads
    pub nzb_filename: String,
    /// Category
    pub category: String,
    /// Insert at the top of the queue
    pub add_first: bool,
    /// Add paused
    pub add_paused: bool,
    /// Priority
    pub priority: i32,
    /// Duplicate score
    pub dupe_score: i32,
    /// Duplicate mode
    pub dupe_mode: i32,
    /// Duplicate key
    pub dupe_key: String,
    /// NZB body or URL string
    pub content: Vec<u8>,
}

impl DownloadRequest {
    /// Fixed struct size on the wire.
    pub const STRUCT_SIZE: usize = REQUEST_HEADER_SIZE + NAME_SIZE * 3 + 4 * 6;

    /// Parse the variant body (everything after the header) plus trailing
    /// content.
    pub fn parse(body: &[u8]) -> Result<(Self, usize)> {
        let mut reader = WireReader::new(body);
        let nzb_filename = reader.read_fixed_string(NAME_SIZE)?;
        let category = reader.read_fixed_string(NAME_SIZE)?;
        let add_first = reader.read_i32()? != 0;
        let add_paused = reader.read_i32()? != 0;
        let priority = reader.read_i32()?;
        let dupe_score = reader.read_i32()?;
        let dupe_mode = reader.read_i32()?;
        let dupe_key = reader.read_fixed_string(NAME_SIZE)?;
        let trailing = reader.read_i32()? as usize;
        Ok((
            Self {
                nzb_filename,
                category,
                add_first,
                add_paused,
                priority,
                dupe_score,
                dupe_mode,
                dupe_key,
                content: Vec::new(),
            },
            trailing,
        ))
    }

    /// Encode the full request (client side).
    pub fn encode(&self, username: &str, password: &str) -> Vec<u8> {
        let mut writer = WireWriter::new();
        RequestHeader::encode(
            &mut writer,
            Self::STRUCT_SIZE as u32,
            RequestKind::Download,
            username,
            password,
        );
        writer.write_fixed_string(&self.nzb_filename, NAME_SIZE);
        writer.write_fixed_string(&self.category, NAME_SIZE);
        writer.write_i32(self.add_first as i32);
        writer.write_i32(self.add_paused as i32);
        writer.write_i32(self.priority);
        writer.write_i32(self.dupe_score);
        writer.write_i32(self.dupe_mode);
        writer.write_fixed_string(&self.dupe_key, NAME_SIZE);
        writer.write_i32(self.content.len() as i32);
        writer.write_bytes(&self.content);
        writer.into_bytes()
    }
}

/// List request (type 3).
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Include file entries
    pub file_list: bool,
    /// Include server state
    pub server_state: bool,
    /// Match mode (id = no filter, regex = pattern filter)
    pub match_mode: i32,
    /// Regex applies to groups (1) or files (0)
    pub match_group: bool,
    /// Regex pattern
    pub pattern: String,
}

impl ListRequest {
    /// Fixed struct size on the wire.
    pub const STRUCT_SIZE: usize = REQUEST_HEADER_SIZE + 4 * 4 + NAME_SIZE;

    /// Parse the variant body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(body);
        Ok(Self {
            file_list: reader.read_i32()? != 0,
            server_state: reader.read_i32()? != 0,
            match_mode: reader.read_i32()?,
            match_group: reader.read_i32()? != 0,
            pattern: reader.read_fixed_string(NAME_SIZE)?,
        })
    }

    /// Encode the full request (client side).
    pub fn encode(&self, username: &str, password: &str) -> Vec<u8> {
        let mut writer = WireWriter::new();
        RequestHeader::encode(
            &mut writer,
            Self::STRUCT_SIZE as u32,
            RequestKind::List,
            username,
            password,
        );
        writer.write_i32(self.file_list as i32);
        writer.write_i32(self.server_state as i32);
        writer.write_i32(self.match_mode);
        writer.write_i32(self.match_group as i32);
        writer.write_fixed_string(&self.pattern, NAME_SIZE);
        writer.into_bytes()
    }
}

/// EditQueue request (type 6).
#[derive(Debug, Clone, Default)]
pub struct EditQueueRequest {
    /// Action code (see [`edit_action`])
    pub action: i32,
    /// Offset for move actions
    pub offset: i32,
    /// Match mode (see [`match_mode`])
    pub match_mode: i32,
    /// Optional text argument (new name, category, `key=value`, pattern)
    pub text: String,
    /// Item ids (file ids; for group actions, any file of the group)
    pub ids: Vec<i32>,
    /// Item names
    pub names: Vec<String>,
}

impl EditQueueRequest {
    /// Fixed struct size on the wire.
    pub const STRUCT_SIZE: usize = REQUEST_HEADER_SIZE + 4 * 8;

    /// Parse the variant body; returns the request shell plus the trailing
    /// byte count that must be read next.
    pub fn parse(body: &[u8]) -> Result<(Self, EditQueueTrailer)> {
        let mut reader = WireReader::new(body);
        let action = reader.read_i32()?;
        let offset = reader.read_i32()?;
        let match_mode = reader.read_i32()?;
        let nr_ids = reader.read_i32()?.max(0) as usize;
        let nr_names = reader.read_i32()?.max(0) as usize;
        let names_len = reader.read_i32()?.max(0) as usize;
        let text_len = reader.read_i32()?.max(0) as usize;
        let trailing = reader.read_i32()?.max(0) as usize;
        Ok((
            Self {
                action,
                offset,
                match_mode,
                text: String::new(),
                ids: Vec::new(),
                names: Vec::new(),
            },
            EditQueueTrailer {
                nr_ids,
                nr_names,
                names_len,
                text_len,
                trailing,
            },
        ))
    }

    /// Fill text/ids/names from the trailing block.
    pub fn parse_trailer(&mut self, trailer: &EditQueueTrailer, buf: &[u8]) -> Result<()> {
        let mut reader = WireReader::new(buf);
        if trailer.text_len > 0 {
            self.text = reader.read_padded_string(trailer.text_len)?;
        }
        for _ in 0..trailer.nr_ids {
            let id = reader.read_i32()?;
            self.ids.push(id);
        }
        let names_block = reader.read_bytes(trailer.names_len)?;
        let mut start = 0usize;
        for _ in 0..trailer.nr_names {
            let Some(rel) = names_block[start..].iter().position(|&b| b == 0) else {
                break;
            };
            self.names.push(
                String::from_utf8_lossy(&names_block[start..start + rel]).into_owned(),
            );
            start += rel + 1;
        }
        Ok(())
    }

    /// Encode the full request (client side).
    pub fn encode(&self, username: &str, password: &str) -> Vec<u8> {
        let text_bytes = if self.text.is_empty() {
            Vec::new()
        } else {
            let mut b = self.text.as_bytes().to_vec();
            b.push(0);
            b
        };
        let mut names_block = Vec::new();
        for name in &self.names {
            names_block.extend_from_slice(name.as_bytes());
            names_block.push(0);
        }
        let trailing = text_bytes.len() + self.ids.len() * 4 + names_block.len();

        let mut writer = WireWriter::new();
        RequestHeader::encode(
            &mut writer,
            Self::STRUCT_SIZE as u32,
            RequestKind::EditQueue,
            username,
            password,
        );
        writer.write_i32(self.action);
        writer.write_i32(self.offset);
        writer.write_i32(self.match_mode);
        writer.write_i32(self.ids.len() as i32);
        writer.write_i32(self.names.len() as i32);
        writer.write_i32(names_block.len() as i32);
        writer.write_i32(text_bytes.len() as i32);
        writer.write_i32(trailing as i32);
        writer.write_bytes(&text_bytes);
        for id in &self.ids {
            writer.write_i32(*id);
        }
        writer.write_bytes(&names_block);
        writer.into_bytes()
    }
}

/// Trailing block geometry for an EditQueue request.
#[derive(Debug, Clone, Copy)]
pub struct EditQueueTrailer {
    /// Number of id entries
    pub nr_ids: usize,
    /// Number of name entries
    pub nr_names: usize,
    /// Byte length of the names block
    pub names_len: usize,
    /// Stored text length (including NUL)
    pub text_len: usize,
    /// Total trailing byte count
    pub trailing: usize,
}

/// Encode a simple request of header + `extra` i32 fields (client side).
pub fn encode_simple_request(
    kind: RequestKind,
    username: &str,
    password: &str,
    extra: &[i32],
) -> Vec<u8> {
    let struct_size = REQUEST_HEADER_SIZE + extra.len() * 4;
    let mut writer = WireWriter::new();
    RequestHeader::encode(&mut writer, struct_size as u32, kind, username, password);
    for value in extra {
        writer.write_i32(*value);
    }
    writer.into_bytes()
}

/// Encode a WriteLog request (client side).
pub fn encode_write_log_request(
    username: &str,
    password: &str,
    kind: i32,
    text: &str,
) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    let struct_size = REQUEST_HEADER_SIZE + 8;
    let mut writer = WireWriter::new();
    RequestHeader::encode(
        &mut writer,
        struct_size as u32,
        RequestKind::WriteLog,
        username,
        password,
    );
    writer.write_i32(kind);
    writer.write_i32(bytes.len() as i32);
    writer.write_bytes(&bytes);
    writer.into_bytes()
}

// ---- responses -----------------------------------------------------------

/// Generic `{ok, text}` response used by every action endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolResponse {
    /// Whether the command succeeded
    pub success: bool,
    /// Human-readable status text
    pub text: String,
}

impl BoolResponse {
    /// Fixed struct size on the wire.
    pub const STRUCT_SIZE: usize = 8 + 8;

    /// Success with text.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
        }
    }

    /// Failure with text.
    pub fn fail(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
        }
    }

    /// Serialize: base + success + trailing length + padded text.
    pub fn to_bytes(&self) -> Vec<u8> {
        let padded = pad_string(&self.text);
        let mut writer = WireWriter::new();
        writer.write_i32(SIGNATURE as i32);
        writer.write_i32(Self::STRUCT_SIZE as i32);
        writer.write_i32(self.success as i32);
        writer.write_i32(padded.len() as i32);
        writer.write_bytes(&padded);
        writer.into_bytes()
    }

    /// Deserialize (client side).
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(buf);
        let signature = reader.read_i32()? as u32;
        if signature != SIGNATURE {
            return Err(Error::RpcProtocol("bad response signature".to_string()));
        }
        let struct_size = reader.read_i32()? as usize;
        if struct_size != Self::STRUCT_SIZE {
            return Err(Error::RpcProtocol(format!(
                "unexpected struct size {struct_size}"
            )));
        }
        let success = reader.read_i32()? != 0;
        let trailing = reader.read_i32()? as usize;
        let text = if trailing > 0 {
            reader.read_padded_string(trailing)?
        } else {
            String::new()
        };
        Ok(Self { success, text })
    }
}

/// One job entry of a List response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListJobEntry {
    /// Job id
    pub id: i32,
    /// Job kind code
    pub kind: i32,
    /// Total size
    pub size: u64,
    /// Remaining size
    pub remaining_size: u64,
    /// Paused size
    pub paused_size: u64,
    /// Paused file count
    pub paused_count: i32,
    /// Remaining par count
    pub remaining_par_count: i32,
    /// Priority
    pub priority: i32,
    /// Regex match flag
    pub matched: bool,
    /// Source filename
    pub filename: String,
    /// Display name
    pub name: String,
    /// Destination directory
    pub dest_dir: String,
    /// Category
    pub category: String,
    /// Queued source filename
    pub queued_filename: String,
}

/// One file entry of a List response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFileEntry {
    /// File id
    pub id: i32,
    /// Index into the job entry array
    pub job_index: i32,
    /// File size
    pub file_size: u64,
    /// Remaining size
    pub remaining_size: u64,
    /// Paused flag
    pub paused: bool,
    /// Filename confirmed from a yEnc header
    pub filename_confirmed: bool,
    /// Active downloads
    pub active_downloads: i32,
    /// Regex match flag
    pub matched: bool,
    /// Subject
    pub subject: String,
    /// Filename
    pub filename: String,
}

/// List response (type 3).
#[derive(Debug, Clone, Default)]
pub struct ListResponse {
    /// Remaining unpaused bytes in the queue
    pub remaining_size: u64,
    /// Current download rate
    pub download_rate: i32,
    /// Rate limit
    pub download_limit: i32,
    /// Download pause register
    pub download_paused: bool,
    /// Standby (no downloads in flight)
    pub download_standby: bool,
    /// Post-processing pause register
    pub post_paused: bool,
    /// Scan pause register
    pub scan_paused: bool,
    /// Running downloader tasks
    pub thread_count: i32,
    /// Post-processor queue length (collaborator)
    pub post_job_count: i32,
    /// Uptime in seconds
    pub uptime_sec: i32,
    /// Download (non-standby) time in seconds
    pub download_time_sec: i32,
    /// Session downloaded bytes
    pub downloaded_bytes: u64,
    /// Whether the request's regex compiled
    pub regex_valid: bool,
    /// Job entries
    pub jobs: Vec<ListJobEntry>,
    /// File entries
    pub files: Vec<ListFileEntry>,
}

impl ListResponse {
    /// Fixed struct size on the wire.
    pub const STRUCT_SIZE: usize = 8 + 21 * 4;
    /// Fixed size of one job entry.
    pub const JOB_ENTRY_SIZE: usize = 17 * 4;
    /// Fixed size of one file entry.
    pub const FILE_ENTRY_SIZE: usize = 12 * 4;

    /// Serialize header + entries + trailing strings.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut trailer = WireWriter::new();
        for job in &self.jobs {
            let filename = pad_string(&job.filename);
            let name = pad_string(&job.name);
            let dest_dir = pad_string(&job.dest_dir);
            let category = pad_string(&job.category);
            let queued = pad_string(&job.queued_filename);
            trailer.write_i32(job.id);
            trailer.write_i32(job.kind);
            trailer.write_u64_lo_hi(job.size);
            trailer.write_u64_lo_hi(job.remaining_size);
            trailer.write_u64_lo_hi(job.paused_size);
            trailer.write_i32(job.paused_count);
            trailer.write_i32(job.remaining_par_count);
            trailer.write_i32(job.priority);
            trailer.write_i32(job.matched as i32);
            trailer.write_i32(filename.len() as i32);
            trailer.write_i32(name.len() as i32);
            trailer.write_i32(dest_dir.len() as i32);
            trailer.write_i32(category.len() as i32);
            trailer.write_i32(queued.len() as i32);
            trailer.write_bytes(&filename);
            trailer.write_bytes(&name);
            trailer.write_bytes(&dest_dir);
            trailer.write_bytes(&category);
            trailer.write_bytes(&queued);
        }
        for file in &self.files {
            let subject = pad_string(&file.subject);
            let filename = pad_string(&file.filename);
            trailer.write_i32(file.id);
            trailer.write_i32(file.job_index);
            trailer.write_u64_lo_hi(file.file_size);
            trailer.write_u64_lo_hi(file.remaining_size);
            trailer.write_i32(file.paused as i32);
            trailer.write_i32(file.filename_confirmed as i32);
            trailer.write_i32(file.active_downloads);
            trailer.write_i32(file.matched as i32);
            trailer.write_i32(subject.len() as i32);
            trailer.write_i32(filename.len() as i32);
            trailer.write_bytes(&subject);
            trailer.write_bytes(&filename);
        }
        let trailer = trailer.into_bytes();

        let mut writer = WireWriter::new();
        writer.write_i32(SIGNATURE as i32);
        writer.write_i32(Self::STRUCT_SIZE as i32);
        writer.write_i32(Self::JOB_ENTRY_SIZE as i32);
        writer.write_u64_lo_hi(self.remaining_size);
        writer.write_i32(self.download_rate);
        writer.write_i32(self.download_limit);
        writer.write_i32(self.download_paused as i32);
        writer.write_i32(self.download_paused as i32); // second pause register mirrors the first
        writer.write_i32(self.download_standby as i32);
        writer.write_i32(self.post_paused as i32);
        writer.write_i32(self.scan_paused as i32);
        writer.write_i32(self.thread_count);
        writer.write_i32(self.post_job_count);
        writer.write_i32(self.uptime_sec);
        writer.write_i32(self.download_time_sec);
        writer.write_u64_lo_hi(self.downloaded_bytes);
        writer.write_i32(self.regex_valid as i32);
        writer.write_i32(self.jobs.len() as i32);
        writer.write_i32(0); // pp-parameter entries are collaborator territory
        writer.write_i32(self.files.len() as i32);
        writer.write_i32(trailer.len() as i32);
        writer.write_bytes(&trailer);
        writer.into_bytes()
    }

    /// Deserialize (client side).
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(buf);
        let signature = reader.read_i32()? as u32;
        if signature != SIGNATURE {
            return Err(Error::RpcProtocol("bad response signature".to_string()));
        }
        let struct_size = reader.read_i32()? as usize;
        if struct_size != Self::STRUCT_SIZE {
            return Err(Error::RpcProtocol(format!(
                "unexpected struct size {struct_size}"
            )));
        }
        let _entry_size = reader.read_i32()?;
        let remaining_size = reader.read_u64_lo_hi()?;
        let download_rate = reader.read_i32()?;
        let download_limit = reader.read_i32()?;
        let download_paused = reader.read_i32()? != 0;
        let _download2_paused = reader.read_i32()? != 0;
        let download_standby = reader.read_i32()? != 0;
        let post_paused = reader.read_i32()? != 0;
        let scan_paused = reader.read_i32()? != 0;
        let thread_count = reader.read_i32()?;
        let post_job_count = reader.read_i32()?;
        let uptime_sec = reader.read_i32()?;
        let download_time_sec = reader.read_i32()?;
        let downloaded_bytes = reader.read_u64_lo_hi()?;
        let regex_valid = reader.read_i32()? != 0;
        let nr_jobs = reader.read_i32()?.max(0) as usize;
        let _nr_ppp = reader.read_i32()?.max(0) as usize;
        let nr_files = reader.read_i32()?.max(0) as usize;
        let _trailing = reader.read_i32()?.max(0) as usize;

        let mut jobs = Vec::with_capacity(nr_jobs);
        for _ in 0..nr_jobs {
            let id = reader.read_i32()?;
            let kind = reader.read_i32()?;
            let size = reader.read_u64_lo_hi()?;
            let remaining_size = reader.read_u64_lo_hi()?;
            let paused_size = reader.read_u64_lo_hi()?;
            let paused_count = reader.read_i32()?;
            let remaining_par_count = reader.read_i32()?;
            let priority = reader.read_i32()?;
            let matched = reader.read_i32()? != 0;
            let filename_len = reader.read_i32()?.max(0) as usize;
            let name_len = reader.read_i32()?.max(0) as usize;
            let dest_dir_len = reader.read_i32()?.max(0) as usize;
            let category_len = reader.read_i32()?.max(0) as usize;
            let queued_len = reader.read_i32()?.max(0) as usize;
            jobs.push(ListJobEntry {
                id,
                kind,
                size,
                remaining_size,
                paused_size,
                paused_count,
                remaining_par_count,
                priority,
                matched,
                filename: reader.read_padded_string(filename_len)?,
                name: reader.read_padded_string(name_len)?,
                dest_dir: reader.read_padded_string(dest_dir_len)?,
                category: reader.read_padded_string(category_len)?,
                queued_filename: reader.read_padded_string(queued_len)?,
            });
        }
        let mut files = Vec::with_capacity(nr_files);
        for _ in 0..nr_files {
            let id = reader.read_i32()?;
            let job_index = reader.read_i32()?;
            let file_size = reader.read_u64_lo_hi()?;
            let remaining_size = reader.read_u64_lo_hi()?;
            let paused = reader.read_i32()? != 0;
            let filename_confirmed = reader.read_i32()? != 0;
            let active_downloads = reader.read_i32()?;
            let matched = reader.read_i32()? != 0;
            let subject_len = reader.read_i32()?.max(0) as usize;
            let filename_len = reader.read_i32()?.max(0) as usize;
            files.push(ListFileEntry {
                id,
                job_index,
                file_size,
                remaining_size,
                paused,
                filename_confirmed,
                active_downloads,
                matched,
                subject: reader.read_padded_string(subject_len)?,
                filename: reader.read_padded_string(filename_len)?,
            });
        }

        Ok(Self {
            remaining_size,
            download_rate,
            download_limit,
            download_paused,
            download_standby,
            post_paused,
            scan_paused,
            thread_count,
            post_job_count,
            uptime_sec,
            download_time_sec,
            downloaded_bytes,
            regex_valid,
            jobs,
            files,
        })
    }
}

/// One entry of a Log response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Message id
    pub id: i32,
    /// Message kind code
    pub kind: i32,
    /// Unix timestamp
    pub time: i32,
    /// Text
    pub text: String,
}

/// Log response (type 7).
#[derive(Debug, Clone, Default)]
pub struct LogResponse {
    /// Entries, oldest first
    pub entries: Vec<LogEntry>,
}

impl LogResponse {
    /// Fixed struct size on the wire.
    pub const STRUCT_SIZE: usize = 8 + 12;
    /// Fixed size of one entry.
    pub const ENTRY_SIZE: usize = 16;

    /// Serialize.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut trailer = WireWriter::new();
        for entry in &self.entries {
            let text = pad_string(&entry.text);
            trailer.write_i32(entry.id);
            trailer.write_i32(entry.kind);
            trailer.write_i32(entry.time);
            trailer.write_i32(text.len() as i32);
            trailer.write_bytes(&text);
        }
        let trailer = trailer.into_bytes();

        let mut writer = WireWriter::new();
        writer.write_i32(SIGNATURE as i32);
        writer.write_i32(Self::STRUCT_SIZE as i32);
        writer.write_i32(Self::ENTRY_SIZE as i32);
        writer.write_i32(self.entries.len() as i32);
        writer.write_i32(trailer.len() as i32);
        writer.write_bytes(&trailer);
        writer.into_bytes()
    }

    /// Deserialize (client side).
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(buf);
        let signature = reader.read_i32()? as u32;
        if signature != SIGNATURE {
            return Err(Error::RpcProtocol("bad response signature".to_string()));
        }
        let _struct_size = reader.read_i32()?;
        let _entry_size = reader.read_i32()?;
        let nr_entries = reader.read_i32()?.max(0) as usize;
        let _trailing = reader.read_i32()?;
        let mut entries = Vec::with_capacity(nr_entries);
        for _ in 0..nr_entries {
            let id = reader.read_i32()?;
            let kind = reader.read_i32()?;
            let time = reader.read_i32()?;
            let text_len = reader.read_i32()?.max(0) as usize;
            let text = reader.read_padded_string(text_len)?;
            entries.push(LogEntry {
                id,
                kind,
                time,
                text,
            });
        }
        Ok(Self { entries })
    }
}

/// One entry of a History response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryWireEntry {
    /// History id
    pub id: i32,
    /// Kind: 1 collection, 2 url, 3 dupe (hidden)
    pub kind: i32,
    /// Unix timestamp
    pub time: i32,
    /// Total size
    pub size: u64,
    /// Initial file count (collections)
    pub file_count: i32,
    /// Par collaborator status
    pub par_status: i32,
    /// Script collaborator status
    pub script_status: i32,
    /// URL status (url entries)
    pub url_status: i32,
    /// Display name
    pub name: String,
}

/// History response (type 14).
#[derive(Debug, Clone, Default)]
pub struct HistoryResponse {
    /// Entries, most recent last
    pub entries: Vec<HistoryWireEntry>,
}

impl HistoryResponse {
    /// Fixed struct size on the wire.
    pub const STRUCT_SIZE: usize = 8 + 12;
    /// Fixed size of one entry.
    pub const ENTRY_SIZE: usize = 10 * 4;

    /// Serialize.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut trailer = WireWriter::new();
        for entry in &self.entries {
            let name = pad_string(&entry.name);
            trailer.write_i32(entry.id);
            trailer.write_i32(entry.kind);
            trailer.write_i32(entry.time);
            trailer.write_i32(name.len() as i32);
            trailer.write_u64_lo_hi(entry.size);
            trailer.write_i32(entry.file_count);
            trailer.write_i32(entry.par_status);
            trailer.write_i32(entry.script_status);
            trailer.write_i32(entry.url_status);
            trailer.write_bytes(&name);
        }
        let trailer = trailer.into_bytes();

        let mut writer = WireWriter::new();
        writer.write_i32(SIGNATURE as i32);
        writer.write_i32(Self::STRUCT_SIZE as i32);
        writer.write_i32(Self::ENTRY_SIZE as i32);
        writer.write_i32(self.entries.len() as i32);
        writer.write_i32(trailer.len() as i32);
        writer.write_bytes(&trailer);
        writer.into_bytes()
    }

    /// Deserialize (client side).
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(buf);
        let signature = reader.read_i32()? as u32;
        if signature != SIGNATURE {
            return Err(Error::RpcProtocol("bad response signature".to_string()));
        }
        let _struct_size = reader.read_i32()?;
        let _entry_size = reader.read_i32()?;
        let nr_entries = reader.read_i32()?.max(0) as usize;
        let _trailing = reader.read_i32()?;
        let mut entries = Vec::with_capacity(nr_entries);
        for _ in 0..nr_entries {
            let id = reader.read_i32()?;
            let kind = reader.read_i32()?;
            let time = reader.read_i32()?;
            let name_len = reader.read_i32()?.max(0) as usize;
            let size = reader.read_u64_lo_hi()?;
            let file_count = reader.read_i32()?;
            let par_status = reader.read_i32()?;
            let script_status = reader.read_i32()?;
            let url_status = reader.read_i32()?;
            let name = reader.read_padded_string(name_len)?;
            entries.push(HistoryWireEntry {
                id,
                kind,
                time,
                size,
                file_count,
                par_status,
                script_status,
                url_status,
                name,
            });
        }
        Ok(Self { entries })
    }
}

/// PostQueue response (type 11): structurally a list that is legitimately
/// empty — the post-processor is a collaborator.
pub fn post_queue_response() -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.write_i32(SIGNATURE as i32);
    writer.write_i32(20);
    writer.write_i32(10 * 4); // entry size, for forward compatibility
    writer.write_i32(0); // no entries
    writer.write_i32(0); // trailing_data_length = 0 is a legitimate empty result
    writer.into_bytes()
}
