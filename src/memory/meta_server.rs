use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use xxhash_rust::xxh3::{xxh3_128, xxh3_64};

use crate::constants::CHUNK_SIZE;
use crate::data::layout::StripeLayout;
use crate::data::placement::{PlacementStrategy, RoundRobinPlacement};
use crate::delegation::now_secs;
use crate::error::errno;
use crate::memory::chunk_server::MemoryChunkServer;
use crate::metadata::path;
use crate::metadata::types::{FileAttr, GroupId, UserId};
use crate::rpc::{
    ChunkSlot, CreateRequest, MetaServerClient, MkdirRequest, RpcError, RpcResult,
    ServerLocation, TokenReply,
};

/// Renewal window when the requester asks for 0
pub const DEFAULT_TOKEN_VALIDITY_SECS: u64 = 60 * 60;

/// Absolute token lifetime
pub const TOKEN_LIFETIME_SECS: u64 = 24 * 60 * 60;

const ROOT_FILE_ID: i64 = 2;

fn status<T>(code: i32) -> RpcResult<T> {
    Err(RpcError::Status(code))
}

#[derive(Debug, Clone)]
struct Inode {
    file_id: i64,
    is_directory: bool,
    filesize: u64,
    mtime: i64,
    attr_change_time: i64,
    creation_time: i64,
    layout: StripeLayout,
    owner: u32,
    group: u32,
    mode: u32,
    chunks: BTreeMap<u64, ChunkSlot>,
}

#[derive(Debug)]
struct TokenRecord {
    key: Vec<u8>,
    delegation_allowed: bool,
    issued_time: u64,
    requested_validity: u64,
    token_valid_for_sec: u64,
    canceled: bool,
}

impl TokenRecord {
    fn reply(&self, token: &[u8]) -> TokenReply {
        TokenReply {
            token: token.to_vec(),
            key: self.key.clone(),
            delegation_allowed: self.delegation_allowed,
            issued_time: self.issued_time,
            token_valid_for_sec: self.token_valid_for_sec,
            delegation_valid_for_sec: TOKEN_LIFETIME_SECS,
        }
    }
}

#[derive(Default)]
struct Namespace {
    inodes: BTreeMap<String, Inode>,
    paths_by_id: HashMap<i64, String>,
    next_file_id: i64,
    next_chunk_id: i64,
    last_tick: i64,
    locations: Vec<ServerLocation>,
    chunk_servers: Vec<Arc<MemoryChunkServer>>,
    tokens: HashMap<Vec<u8>, TokenRecord>,
    next_token: u64,
    user_names: HashMap<u32, String>,
    group_names: HashMap<u32, String>,
}

impl Namespace {
    fn children<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = (&'a String, &'a Inode)> + 'a {
        let prefix = if dir == path::ROOT {
            path::ROOT.to_string()
        } else {
            format!("{}/", dir)
        };
        self.inodes
            .range(prefix.clone()..)
            .take_while(move |(p, _)| p.starts_with(&prefix))
            .filter(move |(p, _)| p.as_str() != path::ROOT && path::parent(p) == Some(dir))
    }

    /// Inode at `path`, with ENOTDIR when an ancestor is a file
    fn find(&self, path: &str) -> RpcResult<&Inode> {
        if let Some(inode) = self.inodes.get(path) {
            return Ok(inode);
        }
        for prefix in path::prefixes(path) {
            match self.inodes.get(&prefix) {
                Some(inode) if !inode.is_directory => return status(errno::ENOTDIR),
                Some(_) => {}
                None => break,
            }
        }
        status(errno::ENOENT)
    }

    fn check_parent(&self, path: &str) -> RpcResult<()> {
        let Some(parent) = path::parent(path) else {
            return status(errno::EEXIST);
        };
        if self.find(parent)?.is_directory {
            Ok(())
        } else {
            status(errno::ENOTDIR)
        }
    }

    fn path_of(&self, file_id: i64) -> RpcResult<String> {
        self.paths_by_id
            .get(&file_id)
            .cloned()
            .ok_or(RpcError::Status(errno::ENOENT))
    }

    fn attr(&self, path: &str, inode: &Inode) -> FileAttr {
        let (dir_count, file_count) = if inode.is_directory {
            self.children(path).fold((0, 0), |(d, f), (_, child)| {
                if child.is_directory {
                    (d + 1, f)
                } else {
                    (d, f + 1)
                }
            })
        } else {
            (0, 0)
        };
        let owner = UserId::from_wire(inode.owner);
        let group = GroupId::from_wire(inode.group);

        FileAttr {
            name: path::basename(path).to_string(),
            is_directory: inode.is_directory,
            filesize: inode.filesize,
            modification_time: inode.mtime,
            attr_change_time: inode.attr_change_time,
            creation_time: inode.creation_time,
            layout: inode.layout,
            owner,
            group,
            owner_name: name_of(&self.user_names, owner.map(|u| u.0)),
            group_name: name_of(&self.group_names, group.map(|g| g.0)),
            mode: inode.mode,
            file_id: inode.file_id,
            dir_count,
            file_count,
            chunk_count: inode.chunks.len() as u64,
        }
    }

    fn insert(&mut self, path: String, inode: Inode) {
        self.paths_by_id.insert(inode.file_id, path.clone());
        self.inodes.insert(path, inode);
    }

    fn unlink(&mut self, path: &str) -> Option<Inode> {
        let inode = self.inodes.remove(path)?;
        self.paths_by_id.remove(&inode.file_id);
        for chunk in inode.chunks.values() {
            for server in &self.chunk_servers {
                server.delete_chunk(chunk.chunk_id);
            }
        }
        Some(inode)
    }
}

fn name_of(table: &HashMap<u32, String>, id: Option<u32>) -> String {
    match id {
        None => String::new(),
        Some(id) => table.get(&id).cloned().unwrap_or_else(|| id.to_string()),
    }
}

/// Bytes of `slot` that survive truncating the file to `size`
///
/// `None` drops the chunk. Recovery chunks of a surviving block are kept
/// whole.
fn retained_len(layout: &StripeLayout, slot: u64, size: u64) -> Option<u64> {
    if !layout.is_striped() {
        let start = slot * CHUNK_SIZE;
        return (size > start).then(|| (size - start).min(CHUNK_SIZE));
    }

    let spb = layout.slots_per_block();
    let block_size = layout.block_size();
    let block_start = (slot / spb) * block_size;
    if size <= block_start {
        return None;
    }
    let index = slot % spb;
    if index >= layout.num_stripes as u64 {
        return Some(CHUNK_SIZE);
    }

    let in_block = (size - block_start).min(block_size);
    let row_bytes = layout.stripe_size * layout.num_stripes as u64;
    let full_rows = in_block / row_bytes;
    let tail = (in_block % row_bytes).saturating_sub(index * layout.stripe_size);
    Some(full_rows * layout.stripe_size + tail.min(layout.stripe_size))
}

/// In-memory metadata server
///
/// Keeps the whole namespace in one map keyed by normalized path. Chunk
/// placement is round-robin over the registered chunk servers. Modification
/// times are strictly increasing and change only when a file's contents or
/// size change, so they can serve as a cache generation.
pub struct MemoryMetaServer {
    location: ServerLocation,
    state: Mutex<Namespace>,
    clock_offset_secs: AtomicU64,
    delegation_enabled: AtomicBool,
    secret: u64,
}

impl MemoryMetaServer {
    pub fn new() -> Self {
        let secret = xxh3_64(
            format!(
                "{}:{}",
                std::process::id(),
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
            )
            .as_bytes(),
        );
        let server = Self {
            location: ServerLocation::new(
                crate::config::defaults::meta_host(),
                crate::config::defaults::META_PORT,
            ),
            state: Mutex::new(Namespace {
                next_file_id: ROOT_FILE_ID + 1,
                next_chunk_id: 1,
                ..Default::default()
            }),
            clock_offset_secs: AtomicU64::new(0),
            delegation_enabled: AtomicBool::new(true),
            secret,
        };

        let now = server.tick(&mut server.state.lock());
        server.state.lock().insert(
            path::ROOT.to_string(),
            Inode {
                file_id: ROOT_FILE_ID,
                is_directory: true,
                filesize: 0,
                mtime: now,
                attr_change_time: now,
                creation_time: now,
                layout: StripeLayout::default(),
                owner: 0,
                group: 0,
                mode: 0o755,
                chunks: BTreeMap::new(),
            },
        );
        server
    }

    /// Make a chunk server location available for placement
    pub fn add_chunk_server_location(&self, location: ServerLocation) {
        let mut state = self.state.lock();
        if !state.locations.contains(&location) {
            tracing::debug!("chunk server {} registered", location);
            state.locations.push(location);
        }
    }

    /// Register a chunk server so truncation and removal reach its chunks
    pub fn register_chunk_server(&self, server: Arc<MemoryChunkServer>) {
        use crate::rpc::ChunkServerClient;
        self.add_chunk_server_location(server.location().clone());
        self.state.lock().chunk_servers.push(server);
    }

    /// Move the server clock forward
    pub fn advance_clock(&self, secs: u64) {
        self.clock_offset_secs.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set_delegation_enabled(&self, enabled: bool) {
        self.delegation_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn register_user(&self, user: UserId, name: &str) {
        self.state.lock().user_names.insert(user.0, name.to_string());
    }

    pub fn register_group(&self, group: GroupId, name: &str) {
        self.state.lock().group_names.insert(group.0, name.to_string());
    }

    fn now_secs(&self) -> u64 {
        now_secs() + self.clock_offset_secs.load(Ordering::SeqCst)
    }

    fn tick(&self, state: &mut Namespace) -> i64 {
        let offset = self.clock_offset_secs.load(Ordering::SeqCst) as i64 * 1_000_000;
        let now = chrono::Utc::now().timestamp_micros() + offset;
        state.last_tick = now.max(state.last_tick + 1);
        state.last_tick
    }

    fn token_key(&self, token: &[u8]) -> Vec<u8> {
        let mut material = self.secret.to_le_bytes().to_vec();
        material.extend_from_slice(token);
        xxh3_128(&material).to_le_bytes().to_vec()
    }

    fn rename_locked(&self, state: &mut Namespace, src: &str, dst: &str, overwrite: bool) -> RpcResult<()> {
        let src_is_dir = state.find(src)?.is_directory;
        if src == dst {
            return Ok(());
        }
        if path::is_within(dst, src) {
            return status(errno::EINVAL);
        }
        state.check_parent(dst)?;

        if let Some(target) = state.inodes.get(dst) {
            if !overwrite {
                return status(errno::EEXIST);
            }
            match (src_is_dir, target.is_directory) {
                (true, true) => {
                    if state.children(dst).next().is_some() {
                        return status(errno::ENOTEMPTY);
                    }
                }
                (false, true) => return status(errno::EISDIR),
                (true, false) => return status(errno::ENOTDIR),
                (false, false) => {}
            }
            state.unlink(dst);
        }

        let moved: Vec<String> = state
            .inodes
            .keys()
            .filter(|p| path::is_within(p, src))
            .cloned()
            .collect();
        for old in moved {
            if let Some(mut inode) = state.inodes.remove(&old) {
                let new = format!("{}{}", dst, &old[src.len()..]);
                inode.attr_change_time = self.tick(state);
                state.insert(new, inode);
            }
        }
        Ok(())
    }
}

impl Default for MemoryMetaServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetaServerClient for MemoryMetaServer {
    fn location(&self) -> &ServerLocation {
        &self.location
    }

    async fn lookup(&self, path: &str) -> RpcResult<FileAttr> {
        let state = self.state.lock();
        let inode = state.find(path)?;
        Ok(state.attr(path, inode))
    }

    async fn create(&self, request: CreateRequest) -> RpcResult<FileAttr> {
        let mut state = self.state.lock();
        state.check_parent(&request.path)?;
        if let Some(existing) = state.inodes.get(&request.path) {
            if existing.is_directory {
                return status(errno::EISDIR);
            }
            if request.exclusive {
                return status(errno::EEXIST);
            }
            state.unlink(&request.path);
        }

        let now = self.tick(&mut state);
        let file_id = state.next_file_id;
        state.next_file_id += 1;
        let inode = Inode {
            file_id,
            is_directory: false,
            filesize: 0,
            mtime: now,
            attr_change_time: now,
            creation_time: now,
            layout: request.layout,
            owner: request.user,
            group: request.group,
            mode: request.mode,
            chunks: BTreeMap::new(),
        };
        let attr = state.attr(&request.path, &inode);
        state.insert(request.path, inode);
        Ok(attr)
    }

    async fn mkdir(&self, request: MkdirRequest) -> RpcResult<FileAttr> {
        let mut state = self.state.lock();
        if state.inodes.contains_key(&request.path) {
            return status(errno::EEXIST);
        }
        state.check_parent(&request.path)?;

        let now = self.tick(&mut state);
        let file_id = state.next_file_id;
        state.next_file_id += 1;
        let inode = Inode {
            file_id,
            is_directory: true,
            filesize: 0,
            mtime: now,
            attr_change_time: now,
            creation_time: now,
            layout: StripeLayout::default(),
            owner: request.user,
            group: request.group,
            mode: request.mode,
            chunks: BTreeMap::new(),
        };
        let attr = state.attr(&request.path, &inode);
        state.insert(request.path, inode);
        Ok(attr)
    }

    async fn remove(&self, path: &str) -> RpcResult<()> {
        let mut state = self.state.lock();
        if state.find(path)?.is_directory {
            return status(errno::EISDIR);
        }
        state.unlink(path);
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> RpcResult<()> {
        let mut state = self.state.lock();
        if path == path::ROOT {
            return status(errno::EPERM);
        }
        if !state.find(path)?.is_directory {
            return status(errno::ENOTDIR);
        }
        if state.children(path).next().is_some() {
            return status(errno::ENOTEMPTY);
        }
        state.unlink(path);
        Ok(())
    }

    async fn rename(&self, src: &str, dst: &str, overwrite: bool) -> RpcResult<()> {
        let mut state = self.state.lock();
        self.rename_locked(&mut state, src, dst, overwrite)
    }

    async fn readdir(&self, path: &str) -> RpcResult<Vec<String>> {
        let state = self.state.lock();
        if !state.find(path)?.is_directory {
            return status(errno::ENOTDIR);
        }
        Ok(state
            .children(path)
            .map(|(p, _)| path::basename(p).to_string())
            .collect())
    }

    async fn readdirplus(&self, path: &str) -> RpcResult<Vec<FileAttr>> {
        let state = self.state.lock();
        if !state.find(path)?.is_directory {
            return status(errno::ENOTDIR);
        }
        Ok(state
            .children(path)
            .map(|(p, inode)| state.attr(p, inode))
            .collect())
    }

    async fn truncate(&self, file_id: i64, size: u64) -> RpcResult<()> {
        let mut state = self.state.lock();
        let path = state.path_of(file_id)?;
        let now = self.tick(&mut state);
        let Namespace {
            inodes,
            chunk_servers,
            ..
        } = &mut *state;
        let Some(inode) = inodes.get_mut(&path) else {
            return status(errno::ENOENT);
        };
        if inode.is_directory {
            return status(errno::EISDIR);
        }

        let layout = inode.layout;
        inode.chunks.retain(|&slot, chunk| match retained_len(&layout, slot, size) {
            Some(len) => {
                for server in chunk_servers.iter() {
                    server.truncate_chunk(chunk.chunk_id, len as usize);
                }
                true
            }
            None => {
                for server in chunk_servers.iter() {
                    server.delete_chunk(chunk.chunk_id);
                }
                false
            }
        });
        inode.filesize = size;
        inode.mtime = now;
        inode.attr_change_time = now;
        tracing::debug!("truncated {} to {} bytes", path, size);
        Ok(())
    }

    async fn extend_size(&self, file_id: i64, size: u64) -> RpcResult<()> {
        let mut state = self.state.lock();
        let path = state.path_of(file_id)?;
        let now = self.tick(&mut state);
        let Some(inode) = state.inodes.get_mut(&path) else {
            return status(errno::ENOENT);
        };
        if size > inode.filesize {
            inode.filesize = size;
            inode.mtime = now;
        }
        Ok(())
    }

    async fn get_chunk_slots(
        &self,
        file_id: i64,
        first_slot: u64,
        count: u64,
    ) -> RpcResult<Vec<ChunkSlot>> {
        let state = self.state.lock();
        let path = state.path_of(file_id)?;
        let inode = state.find(&path)?;
        Ok(inode
            .chunks
            .range(first_slot..first_slot.saturating_add(count))
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }

    async fn allocate_chunk(&self, file_id: i64, slot: u64) -> RpcResult<ChunkSlot> {
        let mut state = self.state.lock();
        let path = state.path_of(file_id)?;
        let placement = RoundRobinPlacement::new(state.locations.clone());
        let mut next_chunk_id = state.next_chunk_id;

        let Some(inode) = state.inodes.get_mut(&path) else {
            return status(errno::ENOENT);
        };
        if inode.is_directory {
            return status(errno::EISDIR);
        }
        if let Some(existing) = inode.chunks.get(&slot) {
            return Ok(existing.clone());
        }
        if placement.server_count() == 0 {
            return status(errno::ENOSPC);
        }

        // Striped files get their whole block at once
        let spb = inode.layout.slots_per_block();
        let first = (slot / spb) * spb;
        let replicas = inode.layout.replication.max(1) as usize;
        for s in first..first + spb {
            if inode.chunks.contains_key(&s) {
                continue;
            }
            let servers = placement.place_chunk_replicas(file_id, s, replicas);
            inode.chunks.insert(
                s,
                ChunkSlot {
                    slot: s,
                    chunk_id: next_chunk_id,
                    version: 1,
                    servers,
                },
            );
            next_chunk_id += 1;
        }
        let allocated = inode
            .chunks
            .get(&slot)
            .cloned()
            .ok_or(RpcError::Status(errno::EIO))?;
        state.next_chunk_id = next_chunk_id;
        Ok(allocated)
    }

    async fn create_delegation_token(
        &self,
        user: u32,
        allow_delegation: bool,
        valid_for_sec: u64,
    ) -> RpcResult<TokenReply> {
        if !self.delegation_enabled.load(Ordering::SeqCst) {
            return status(errno::EPERM);
        }
        let now = self.now_secs();
        let mut state = self.state.lock();
        state.next_token += 1;

        let mut seed = self.secret.to_le_bytes().to_vec();
        seed.extend_from_slice(&state.next_token.to_le_bytes());
        seed.extend_from_slice(&user.to_le_bytes());
        let token = xxh3_128(&seed).to_le_bytes().to_vec();

        let requested = if valid_for_sec == 0 {
            DEFAULT_TOKEN_VALIDITY_SECS
        } else {
            valid_for_sec
        };
        let record = TokenRecord {
            key: self.token_key(&token),
            delegation_allowed: allow_delegation,
            issued_time: now,
            requested_validity: requested,
            token_valid_for_sec: requested.min(TOKEN_LIFETIME_SECS),
            canceled: false,
        };
        let reply = record.reply(&token);
        state.tokens.insert(token, record);
        Ok(reply)
    }

    async fn renew_delegation_token(&self, token: &[u8], key: &[u8]) -> RpcResult<TokenReply> {
        let now = self.now_secs();
        let mut state = self.state.lock();
        let Some(record) = state.tokens.get_mut(token) else {
            return status(errno::ENOENT);
        };
        if record.key != key {
            return status(errno::EPERM);
        }
        if record.canceled {
            return status(errno::EKEYREVOKED);
        }
        if now >= record.issued_time.saturating_add(TOKEN_LIFETIME_SECS) {
            return status(errno::EKEYEXPIRED);
        }
        if !record.delegation_allowed {
            return status(errno::EPERM);
        }

        let elapsed = now.saturating_sub(record.issued_time);
        record.token_valid_for_sec = elapsed
            .saturating_add(record.requested_validity)
            .min(TOKEN_LIFETIME_SECS);
        Ok(record.reply(token))
    }

    async fn cancel_delegation_token(&self, token: &[u8], key: &[u8]) -> RpcResult<()> {
        let mut state = self.state.lock();
        let Some(record) = state.tokens.get_mut(token) else {
            return status(errno::ENOENT);
        };
        if record.key != key {
            return status(errno::EPERM);
        }
        record.canceled = true;
        Ok(())
    }
}
