//! Property-based testing for the access client
//!
//! This module implements state machine testing using proptest-state-machine
//! to verify the client against an in-memory cluster.
//!
//! The test generates random sequences of file operations (create, append,
//! read, delete, etc.) and compares every observable result with a simple
//! reference model.

use proptest::prelude::*;
use proptest_state_machine::{prop_state_machine, ReferenceStateMachine, StateMachineTest};
use std::collections::HashMap;

use qfs_access::config::ClientConfig;
use qfs_access::memory::MemoryCluster;
use qfs_access::{AccessError, QfsClient};

/// Maximum file size for testing (256KB)
const MAX_FILE_SIZE: usize = 256 * 1024;
/// Maximum number of files to create
const MAX_FILES: usize = 8;
/// Largest single append
const MAX_APPEND: usize = 48 * 1024;
/// Read-ahead used by reads that enable it
const READ_AHEAD: usize = 16 * 1024;

/// File operation transitions for the state machine
#[derive(Clone, Debug)]
pub enum Transition {
    /// Create a new, empty file
    CreateFile { path: String },
    /// Append data at the end of a file
    AppendFile { path: String, data: Vec<u8> },
    /// Read a range, with or without read-ahead
    ReadFile {
        path: String,
        offset: u64,
        length: usize,
        read_ahead: bool,
    },
    /// Delete a file
    DeleteFile { path: String },
    /// Truncate a file to given size
    TruncateFile { path: String, size: u64 },
    /// Rename a file without overwriting
    RenameFile { old_path: String, new_path: String },
    /// Get file size (stat)
    StatFile { path: String },
}

/// Reference state machine that models expected filesystem behavior
#[derive(Clone, Debug, Default)]
pub struct FilesystemRefState {
    /// Map of file paths to their contents
    files: HashMap<String, Vec<u8>>,
    /// Counter for generating unique file names
    file_counter: usize,
}

impl FilesystemRefState {
    /// Get list of existing file paths, in a stable order
    fn existing_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Check if we can create more files
    fn can_create_file(&self) -> bool {
        self.files.len() < MAX_FILES
    }
}

impl ReferenceStateMachine for FilesystemRefState {
    type State = Self;
    type Transition = Transition;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let existing_paths = state.existing_paths();
        let can_create = state.can_create_file();
        let file_counter = state.file_counter;

        let create = "[a-z]{1,4}".prop_map(move |name| Transition::CreateFile {
            path: format!("/pbt/f{}_{}", file_counter, name),
        });

        if existing_paths.is_empty() {
            return create.boxed();
        }

        let mut strategies: Vec<BoxedStrategy<Transition>> = Vec::new();
        if can_create {
            strategies.push(create.boxed());
        }

        let paths = existing_paths;
        strategies.push(
            (
                prop::sample::select(paths.clone()),
                prop::collection::vec(any::<u8>(), 1..MAX_APPEND),
            )
                .prop_map(|(path, data)| Transition::AppendFile { path, data })
                .boxed(),
        );
        strategies.push(
            (
                prop::sample::select(paths.clone()),
                0u64..MAX_FILE_SIZE as u64,
                1usize..MAX_APPEND * 2,
                any::<bool>(),
            )
                .prop_map(|(path, offset, length, read_ahead)| Transition::ReadFile {
                    path,
                    offset,
                    length,
                    read_ahead,
                })
                .boxed(),
        );
        strategies.push(
            prop::sample::select(paths.clone())
                .prop_map(|path| Transition::DeleteFile { path })
                .boxed(),
        );
        strategies.push(
            (prop::sample::select(paths.clone()), 0u64..MAX_FILE_SIZE as u64)
                .prop_map(|(path, size)| Transition::TruncateFile { path, size })
                .boxed(),
        );
        strategies.push(
            prop::sample::select(paths.clone())
                .prop_map(|path| Transition::StatFile { path })
                .boxed(),
        );
        strategies.push(
            (prop::sample::select(paths), "[a-z]{1,4}")
                .prop_map(move |(old_path, new_name)| Transition::RenameFile {
                    old_path,
                    new_path: format!("/pbt/r{}_{}", file_counter, new_name),
                })
                .boxed(),
        );

        prop::strategy::Union::new(strategies).boxed()
    }

    fn preconditions(state: &Self::State, transition: &Self::Transition) -> bool {
        match transition {
            Transition::CreateFile { path } => !state.files.contains_key(path),
            Transition::AppendFile { path, data } => state
                .files
                .get(path)
                .is_some_and(|c| c.len() + data.len() <= MAX_FILE_SIZE),
            Transition::ReadFile { path, .. }
            | Transition::DeleteFile { path }
            | Transition::TruncateFile { path, .. }
            | Transition::StatFile { path } => state.files.contains_key(path),
            Transition::RenameFile { old_path, .. } => state.files.contains_key(old_path),
        }
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            Transition::CreateFile { path } => {
                state.files.insert(path.clone(), Vec::new());
                state.file_counter += 1;
            }
            Transition::AppendFile { path, data } => {
                if let Some(contents) = state.files.get_mut(path) {
                    contents.extend_from_slice(data);
                }
            }
            Transition::ReadFile { .. } => {
                // Read doesn't modify state
            }
            Transition::DeleteFile { path } => {
                state.files.remove(path);
            }
            Transition::TruncateFile { path, size } => {
                if let Some(contents) = state.files.get_mut(path) {
                    contents.resize(*size as usize, 0);
                }
            }
            Transition::RenameFile { old_path, new_path } => {
                // Without overwrite an existing target leaves both in place
                if !state.files.contains_key(new_path) {
                    if let Some(contents) = state.files.remove(old_path) {
                        state.files.insert(new_path.clone(), contents);
                    }
                }
            }
            Transition::StatFile { .. } => {
                // Stat doesn't modify state
            }
        }
        state
    }
}

/// System under test - a client of an in-memory cluster
pub struct QfsHarness {
    runtime: tokio::runtime::Runtime,
    _cluster: MemoryCluster,
    client: QfsClient,
}

impl QfsHarness {
    pub fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to build runtime");
        let cluster = MemoryCluster::new(3);

        let mut config = ClientConfig::default();
        config.io.write_buffer_size = 8 * 1024;
        config.io.default_create_params = "2".to_string();
        let client = cluster.client(config).expect("Failed to build client");
        runtime
            .block_on(client.mkdirs("/pbt"))
            .expect("Failed to create test root");

        Self {
            runtime,
            _cluster: cluster,
            client,
        }
    }

    /// Execute a file operation on the cluster
    pub fn execute(&self, transition: &Transition) -> Result<TransitionResult, AccessError> {
        self.runtime.block_on(async {
            let client = &self.client;
            match transition {
                Transition::CreateFile { path } => {
                    let mut out = client.create(path).await?;
                    out.close().await?;
                    Ok(TransitionResult::Success)
                }
                Transition::AppendFile { path, data } => {
                    let mut out = client.append(path).await?;
                    let mut written = 0;
                    while written < data.len() {
                        written += out.write(&data[written..]).await?;
                    }
                    out.close().await?;
                    Ok(TransitionResult::Success)
                }
                Transition::ReadFile {
                    path,
                    offset,
                    length,
                    read_ahead,
                } => {
                    let read_ahead = if *read_ahead { READ_AHEAD } else { 0 };
                    let mut input = client.open_with_read_ahead(path, Some(read_ahead)).await?;
                    input.seek(*offset)?;
                    let mut buf = vec![0u8; *length];
                    let mut filled = 0;
                    while filled < buf.len() {
                        let n = input.read(&mut buf[filled..]).await?;
                        if n == 0 {
                            break;
                        }
                        filled += n;
                    }
                    buf.truncate(filled);
                    input.close();
                    Ok(TransitionResult::ReadData(buf))
                }
                Transition::DeleteFile { path } => {
                    client.remove(path).await?;
                    Ok(TransitionResult::Success)
                }
                Transition::TruncateFile { path, size } => {
                    client.truncate(path, *size).await?;
                    Ok(TransitionResult::Success)
                }
                Transition::RenameFile { old_path, new_path } => {
                    match client.rename(old_path, new_path, false).await {
                        Ok(()) => Ok(TransitionResult::Success),
                        Err(AccessError::AlreadyExists(_)) => Ok(TransitionResult::Refused),
                        Err(e) => Err(e),
                    }
                }
                Transition::StatFile { path } => {
                    let attr = client.stat(path).await?;
                    Ok(TransitionResult::StatResult {
                        size: attr.filesize,
                    })
                }
            }
        })
    }
}

/// Result of a transition execution
#[derive(Debug)]
pub enum TransitionResult {
    Success,
    Refused,
    ReadData(Vec<u8>),
    StatResult { size: u64 },
}

/// State machine test implementation
pub struct QfsStateMachineTest;

impl StateMachineTest for QfsStateMachineTest {
    type SystemUnderTest = QfsHarness;
    type Reference = FilesystemRefState;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        QfsHarness::new()
    }

    fn apply(
        state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        let result = state
            .execute(&transition)
            .unwrap_or_else(|e| panic!("{:?} failed: {}", transition, e));

        // `ref_state` already has the transition applied
        match (&transition, result) {
            (
                Transition::ReadFile {
                    path,
                    offset,
                    length,
                    ..
                },
                TransitionResult::ReadData(data),
            ) => {
                let expected_contents = &ref_state.files[path];
                let expected_start = (*offset as usize).min(expected_contents.len());
                let expected_end = (*offset as usize + *length).min(expected_contents.len());
                let expected = &expected_contents[expected_start..expected_end];

                assert_eq!(
                    data.len(),
                    expected.len(),
                    "Read length mismatch for {} at offset {}",
                    path,
                    offset
                );
                assert!(
                    data == expected,
                    "Read data mismatch for {} at offset {}",
                    path,
                    offset
                );
            }
            (Transition::StatFile { path }, TransitionResult::StatResult { size }) => {
                assert_eq!(
                    size as usize,
                    ref_state.files[path].len(),
                    "Stat size mismatch for {}",
                    path
                );
            }
            (Transition::RenameFile { old_path, new_path }, TransitionResult::Refused) => {
                assert!(ref_state.files.contains_key(old_path));
                assert!(ref_state.files.contains_key(new_path));
            }
            (Transition::RenameFile { new_path, .. }, TransitionResult::Success) => {
                assert!(ref_state.files.contains_key(new_path));
            }
            (_, TransitionResult::Success) => {}
            (t, r) => panic!("unexpected result {:?} for {:?}", r, t),
        }

        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        let listed = state
            .runtime
            .block_on(state.client.readdir("/pbt"))
            .expect("readdir failed")
            .expect("test root vanished");
        assert_eq!(listed.len(), ref_state.files.len(), "Directory listing mismatch");
    }
}

// Property-based test using the state machine
prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn pbt_filesystem_operations(
        sequential 1..30 => QfsStateMachineTest
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_state_create_file() {
        let mut state = FilesystemRefState::default();
        let transition = Transition::CreateFile {
            path: "/pbt/test".to_string(),
        };
        state = FilesystemRefState::apply(state, &transition);
        assert!(state.files.contains_key("/pbt/test"));
        assert_eq!(state.files["/pbt/test"], Vec::<u8>::new());
        assert_eq!(state.file_counter, 1);
    }

    #[test]
    fn test_reference_state_append_truncate() {
        let mut state = FilesystemRefState::default();
        let path = "/pbt/test".to_string();

        state = FilesystemRefState::apply(state, &Transition::CreateFile { path: path.clone() });
        state = FilesystemRefState::apply(
            state,
            &Transition::AppendFile {
                path: path.clone(),
                data: b"Hello World".to_vec(),
            },
        );
        state = FilesystemRefState::apply(
            state,
            &Transition::TruncateFile {
                path: path.clone(),
                size: 5,
            },
        );
        assert_eq!(state.files[&path], b"Hello");
    }

    #[test]
    fn test_reference_state_rename_refused() {
        let mut state = FilesystemRefState::default();
        for p in ["/pbt/a", "/pbt/b"] {
            state = FilesystemRefState::apply(state, &Transition::CreateFile { path: p.to_string() });
        }
        state = FilesystemRefState::apply(
            state,
            &Transition::RenameFile {
                old_path: "/pbt/a".to_string(),
                new_path: "/pbt/b".to_string(),
            },
        );
        assert!(state.files.contains_key("/pbt/a"));
        assert!(state.files.contains_key("/pbt/b"));
    }

    #[test]
    fn test_harness_roundtrip() {
        let harness = QfsHarness::new();
        let path = "/pbt/x".to_string();
        harness
            .execute(&Transition::CreateFile { path: path.clone() })
            .unwrap();
        harness
            .execute(&Transition::AppendFile {
                path: path.clone(),
                data: vec![7u8; 20_000],
            })
            .unwrap();
        match harness
            .execute(&Transition::ReadFile {
                path,
                offset: 19_990,
                length: 100,
                read_ahead: true,
            })
            .unwrap()
        {
            TransitionResult::ReadData(data) => assert_eq!(data, vec![7u8; 10]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
