//! XIO condition codes.
//!
//! Each XIO instruction reports its outcome to the program in the
//! four condition code bits CC1-CC4.
use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
    pub struct ConditionCode: u8 {
        const CC1 = 0b1000;
        const CC2 = 0b0100;
        const CC3 = 0b0010;
        const CC4 = 0b0001;
    }
}

/// The outcomes an XIO instruction can have.  Callers have to keep
/// these apart: in particular `AcceptedQueued` is not the same as
/// `AcceptedNoStatus`, because the program will not see an echo for a
/// start which was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum XioOutcome {
    /// The request was carried out; any status will arrive later.
    AcceptedNoStatus,
    /// The request was queued behind a program already running on
    /// the unit.
    AcceptedQueued,
    /// A status record was posted to the status buffer instead.
    StatusStored,
    Busy,
    /// The unit is between chained commands.
    BusySubchannel,
    /// The device does not implement this instruction.
    Unsupported,
    /// No such channel or unit, or the unit is disabled.
    DeviceAbsent,
}

impl XioOutcome {
    #[must_use]
    pub fn condition_code(self) -> ConditionCode {
        match self {
            XioOutcome::AcceptedNoStatus => ConditionCode::empty(),
            XioOutcome::AcceptedQueued => ConditionCode::CC1,
            XioOutcome::StatusStored => ConditionCode::CC2,
            XioOutcome::DeviceAbsent => ConditionCode::CC3,
            XioOutcome::Busy => ConditionCode::CC4,
            XioOutcome::BusySubchannel => ConditionCode::CC3 | ConditionCode::CC4,
            XioOutcome::Unsupported => ConditionCode::CC2 | ConditionCode::CC3,
        }
    }

    #[must_use]
    pub const fn all_outcomes() -> [XioOutcome; 7] {
        [
            XioOutcome::AcceptedNoStatus,
            XioOutcome::AcceptedQueued,
            XioOutcome::StatusStored,
            XioOutcome::Busy,
            XioOutcome::BusySubchannel,
            XioOutcome::Unsupported,
            XioOutcome::DeviceAbsent,
        ]
    }
}

impl TryFrom<ConditionCode> for XioOutcome {
    type Error = ConditionCode;
    fn try_from(cc: ConditionCode) -> Result<XioOutcome, ConditionCode> {
        XioOutcome::all_outcomes()
            .into_iter()
            .find(|outcome| outcome.condition_code() == cc)
            .ok_or(cc)
    }
}

#[test]
fn test_condition_codes_are_distinct() {
    for outcome in XioOutcome::all_outcomes() {
        match XioOutcome::try_from(outcome.condition_code()) {
            Ok(decoded) => assert_eq!(decoded, outcome),
            Err(cc) => panic!("condition code {cc:?} for {outcome:?} did not decode"),
        }
    }
    assert!(XioOutcome::try_from(ConditionCode::all()).is_err());
}
