/// API types for the access client

use crate::data::layout::CreateParams;

/// Options of the long create form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Fail if the file exists
    pub exclusive: bool,

    /// Layout request, validated by the planner before any RPC
    pub params: CreateParams,

    /// Unix mode of the new file
    pub mode: u32,

    /// Output buffer size (`None` = client default)
    pub write_buffer_size: Option<usize>,

    /// Reject a striper type that cannot be honored instead of falling back
    /// to replication
    pub force_type: bool,
}

impl CreateOptions {
    pub fn new(params: CreateParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = Some(size);
        self
    }

    pub fn force_type(mut self, force: bool) -> Self {
        self.force_type = force;
        self
    }
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            exclusive: false,
            params: CreateParams::default(),
            mode: 0o666,
            write_buffer_size: None,
            force_type: false,
        }
    }
}
