//! Layout planner
//!
//! Turns creation parameters into a validated [`StripeLayout`]. Parameters
//! come either as explicit fields ([`CreateParams`]) or as the compact string
//! `replication,numStripes,numRecoveryStripes,stripeSize,striperType,minTier,maxTier`;
//! both forms go through the same validation, so they always plan to the
//! same layout. Nothing here touches the network: a rejected layout never
//! reaches the metadata server.

use std::fmt;
use std::str::FromStr;

use crate::constants::{
    CHUNK_SIZE, MAX_DATA_STRIPES, MAX_RECOVERY_STRIPES, MAX_REPLICATION, MAX_STORAGE_TIER,
    MAX_STRIPE_SIZE, MIN_STORAGE_TIER, MIN_STRIPE_SIZE, STRIPE_ALIGNMENT, STRIPER_TYPE_NONE,
    STRIPER_TYPE_RS,
};
use crate::error::{AccessError, AccessResult};

/// How file data is spread over chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StriperType {
    /// Plain replicated chunks
    None,
    /// Reed-Solomon data stripes plus recovery stripes
    ReedSolomon,
}

impl StriperType {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            STRIPER_TYPE_NONE => Some(StriperType::None),
            STRIPER_TYPE_RS => Some(StriperType::ReedSolomon),
            _ => None,
        }
    }

    pub fn as_wire(self) -> i32 {
        match self {
            StriperType::None => STRIPER_TYPE_NONE,
            StriperType::ReedSolomon => STRIPER_TYPE_RS,
        }
    }
}

/// Inclusive storage tier range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageTierRange {
    pub min: u8,
    pub max: u8,
}

impl StorageTierRange {
    pub const ALL: StorageTierRange = StorageTierRange {
        min: MIN_STORAGE_TIER,
        max: MAX_STORAGE_TIER,
    };
}

impl Default for StorageTierRange {
    fn default() -> Self {
        Self::ALL
    }
}

/// Validated layout of a file, fixed at create time
///
/// Replicated layouts always carry zero stripes, zero recovery stripes and
/// a zero stripe size, so two layouts compare equal exactly when the
/// servers would treat them the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StripeLayout {
    pub striper_type: StriperType,
    pub num_stripes: u32,
    pub num_recovery_stripes: u32,
    pub stripe_size: u64,
    pub replication: u32,
    pub tiers: StorageTierRange,
}

impl StripeLayout {
    /// Plain replicated layout over every tier
    pub fn replicated(replication: u32) -> Self {
        Self {
            striper_type: StriperType::None,
            num_stripes: 0,
            num_recovery_stripes: 0,
            stripe_size: 0,
            replication,
            tiers: StorageTierRange::ALL,
        }
    }

    pub fn is_striped(&self) -> bool {
        self.striper_type == StriperType::ReedSolomon
    }

    /// Bytes of file data addressed by one chunk block
    pub fn block_size(&self) -> u64 {
        if self.is_striped() {
            CHUNK_SIZE * self.num_stripes as u64
        } else {
            CHUNK_SIZE
        }
    }

    /// Chunk slots per block, recovery stripes included
    pub fn slots_per_block(&self) -> u64 {
        if self.is_striped() {
            (self.num_stripes + self.num_recovery_stripes) as u64
        } else {
            1
        }
    }
}

impl Default for StripeLayout {
    fn default() -> Self {
        Self::replicated(1)
    }
}

/// Creation parameters as the caller supplied them, not yet validated
///
/// Fields are signed because callers hand over raw integers (`-1` meaning
/// "unset" in several places); the planner rejects what it cannot use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CreateParams {
    pub replication: i32,
    pub num_stripes: i32,
    pub num_recovery_stripes: i32,
    pub stripe_size: i64,
    pub striper_type: i32,
    pub min_tier: i32,
    pub max_tier: i32,
}

impl CreateParams {
    /// Number of fields in the compact form
    pub const FIELD_COUNT: usize = 7;

    /// The `"S"` shorthand: one replica, 6+3 Reed-Solomon, 64KB stripes
    pub fn rs_default() -> Self {
        Self {
            replication: 1,
            num_stripes: 6,
            num_recovery_stripes: 3,
            stripe_size: 64 * 1024,
            striper_type: STRIPER_TYPE_RS,
            min_tier: MIN_STORAGE_TIER as i32,
            max_tier: MAX_STORAGE_TIER as i32,
        }
    }

    /// Plain replicated parameters over every tier
    pub fn replicated(replication: i32) -> Self {
        Self {
            replication,
            ..Self::default()
        }
    }

    fn set_field(&mut self, index: usize, value: i64) -> AccessResult<()> {
        let narrow = |v: i64| {
            i32::try_from(v).map_err(|_| {
                AccessError::InvalidLayout(format!("field {} out of range: {}", index + 1, v))
            })
        };
        match index {
            0 => self.replication = narrow(value)?,
            1 => self.num_stripes = narrow(value)?,
            2 => self.num_recovery_stripes = narrow(value)?,
            3 => self.stripe_size = value,
            4 => self.striper_type = narrow(value)?,
            5 => self.min_tier = narrow(value)?,
            6 => self.max_tier = narrow(value)?,
            _ => {
                return Err(AccessError::InvalidLayout(format!(
                    "too many parameters: expected at most {}",
                    Self::FIELD_COUNT
                )))
            }
        }
        Ok(())
    }
}

impl Default for CreateParams {
    fn default() -> Self {
        Self {
            replication: 1,
            num_stripes: 0,
            num_recovery_stripes: 0,
            stripe_size: 0,
            striper_type: STRIPER_TYPE_NONE,
            min_tier: MIN_STORAGE_TIER as i32,
            max_tier: MAX_STORAGE_TIER as i32,
        }
    }
}

impl FromStr for CreateParams {
    type Err = AccessError;

    /// Parse the compact form
    ///
    /// Trailing fields may be omitted and keep their [`Default`] value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AccessError::InvalidLayout(
                "empty create parameter string".to_string(),
            ));
        }
        if s == "S" {
            return Ok(Self::rs_default());
        }

        let mut params = Self::default();
        for (index, field) in s.split(',').enumerate() {
            let field = field.trim();
            let value: i64 = field.parse().map_err(|_| {
                AccessError::InvalidLayout(format!(
                    "parameter {} is not an integer: {:?}",
                    index + 1,
                    field
                ))
            })?;
            params.set_field(index, value)?;
        }
        Ok(params)
    }
}

impl fmt::Display for CreateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{}",
            self.replication,
            self.num_stripes,
            self.num_recovery_stripes,
            self.stripe_size,
            self.striper_type,
            self.min_tier,
            self.max_tier
        )
    }
}

impl From<StripeLayout> for CreateParams {
    fn from(layout: StripeLayout) -> Self {
        Self {
            replication: layout.replication as i32,
            num_stripes: layout.num_stripes as i32,
            num_recovery_stripes: layout.num_recovery_stripes as i32,
            stripe_size: layout.stripe_size as i64,
            striper_type: layout.striper_type.as_wire(),
            min_tier: layout.tiers.min as i32,
            max_tier: layout.tiers.max as i32,
        }
    }
}

/// Pure layout computation
pub struct LayoutPlanner;

impl LayoutPlanner {
    /// Validate `params` strictly
    pub fn plan(params: &CreateParams) -> AccessResult<StripeLayout> {
        Self::plan_with(params, true)
    }

    /// Parse and validate a compact parameter string
    pub fn plan_str(params: &str) -> AccessResult<StripeLayout> {
        Self::plan(&params.parse()?)
    }

    /// Validate `params`
    ///
    /// With `force_type == false` a Reed-Solomon request carrying zero data
    /// stripes falls back to a replicated layout; with `force_type == true`
    /// it is rejected.
    pub fn plan_with(params: &CreateParams, force_type: bool) -> AccessResult<StripeLayout> {
        if params.replication < 1 || params.replication as u32 > MAX_REPLICATION {
            return Err(AccessError::InvalidLayout(format!(
                "replication must be in [1, {}]: {}",
                MAX_REPLICATION, params.replication
            )));
        }
        let tiers = Self::plan_tiers(params.min_tier, params.max_tier)?;

        let striper_type = StriperType::from_wire(params.striper_type).ok_or_else(|| {
            AccessError::InvalidLayout(format!("unknown striper type: {}", params.striper_type))
        })?;

        let replicated = StripeLayout {
            tiers,
            ..StripeLayout::replicated(params.replication as u32)
        };

        match striper_type {
            StriperType::None => Ok(replicated),
            StriperType::ReedSolomon => {
                if params.num_stripes == 0 && !force_type {
                    tracing::debug!(
                        "striped layout requested with no data stripes, using replication {}",
                        params.replication
                    );
                    return Ok(replicated);
                }
                if params.num_stripes < 1 || params.num_stripes as u32 > MAX_DATA_STRIPES {
                    return Err(AccessError::InvalidLayout(format!(
                        "data stripes must be in [1, {}]: {}",
                        MAX_DATA_STRIPES, params.num_stripes
                    )));
                }
                if params.num_recovery_stripes < 0
                    || params.num_recovery_stripes as u32 > MAX_RECOVERY_STRIPES
                {
                    return Err(AccessError::InvalidLayout(format!(
                        "recovery stripes must be in [0, {}]: {}",
                        MAX_RECOVERY_STRIPES, params.num_recovery_stripes
                    )));
                }
                if params.num_recovery_stripes > params.num_stripes {
                    return Err(AccessError::InvalidLayout(format!(
                        "recovery stripes ({}) exceed data stripes ({})",
                        params.num_recovery_stripes, params.num_stripes
                    )));
                }
                let stripe_size = Self::plan_stripe_size(params.stripe_size)?;

                Ok(StripeLayout {
                    striper_type,
                    num_stripes: params.num_stripes as u32,
                    num_recovery_stripes: params.num_recovery_stripes as u32,
                    stripe_size,
                    replication: params.replication as u32,
                    tiers,
                })
            }
        }
    }

    fn plan_tiers(min: i32, max: i32) -> AccessResult<StorageTierRange> {
        let bounds = MIN_STORAGE_TIER as i32..=MAX_STORAGE_TIER as i32;
        if !bounds.contains(&min) || !bounds.contains(&max) {
            return Err(AccessError::InvalidLayout(format!(
                "storage tiers must be in [{}, {}]: {}..{}",
                MIN_STORAGE_TIER, MAX_STORAGE_TIER, min, max
            )));
        }
        if min > max {
            return Err(AccessError::InvalidLayout(format!(
                "min tier {} above max tier {}",
                min, max
            )));
        }
        Ok(StorageTierRange {
            min: min as u8,
            max: max as u8,
        })
    }

    fn plan_stripe_size(size: i64) -> AccessResult<u64> {
        if size < MIN_STRIPE_SIZE as i64 || size > MAX_STRIPE_SIZE as i64 {
            return Err(AccessError::InvalidLayout(format!(
                "stripe size must be in [{}, {}]: {}",
                MIN_STRIPE_SIZE, MAX_STRIPE_SIZE, size
            )));
        }
        let size = size as u64;
        if size % STRIPE_ALIGNMENT != 0 || CHUNK_SIZE % size != 0 {
            return Err(AccessError::InvalidLayout(format!(
                "stripe size {} must be a multiple of {} dividing the chunk size",
                size, STRIPE_ALIGNMENT
            )));
        }
        Ok(size)
    }
}
