use sea_orm::{sea_query::StringLen, DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Step of a FUOTA deployment. Variants are declared in execution order and
/// the derived ordering is relied upon to keep transitions forward only.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(
    rs_type = "String",
    db_type = "String(StringLen::N(32))",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FuotaState {
    MulticastCreate,
    MulticastSetup,
    FragmentationSessSetup,
    MulticastSessCSetup,
    Enqueue,
    StatusRequest,
    SetDeviceStatus,
    Cleanup,
    Done,
}

impl FuotaState {
    /// The state following `self`, `None` once terminal.
    pub fn next(self) -> Option<FuotaState> {
        use FuotaState::*;
        match self {
            MulticastCreate => Some(MulticastSetup),
            MulticastSetup => Some(FragmentationSessSetup),
            FragmentationSessSetup => Some(MulticastSessCSetup),
            MulticastSessCSetup => Some(Enqueue),
            Enqueue => Some(StatusRequest),
            StatusRequest => Some(SetDeviceStatus),
            SetDeviceStatus => Some(Cleanup),
            Cleanup => Some(Done),
            Done => None,
        }
    }
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize_repr, Deserialize_repr,
)]
#[sea_orm(rs_type = "i16", db_type = "SmallInteger")]
#[repr(i16)]
pub enum FuotaDeviceState {
    Pending = 0,
    Success = 1,
    Error = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_move_forward() {
        let mut state = FuotaState::MulticastCreate;
        let mut steps = 0;
        while let Some(next) = state.next() {
            assert!(next > state);
            state = next;
            steps += 1;
        }
        assert_eq!(state, FuotaState::Done);
        assert_eq!(steps, 8);
    }
}
