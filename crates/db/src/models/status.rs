//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table.

use strata_core::import_status::ImportState;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Import lifecycle status.
    ImportStatus {
        Ready = 1,
        Processing = 2,
        Error = 3,
        Stopped = 4,
        Completed = 5,
    }
}

/// Statuses the processing loop never picks up.
pub const TERMINAL_IMPORT_STATUSES: [StatusId; 3] = [
    ImportStatus::Error as StatusId,
    ImportStatus::Stopped as StatusId,
    ImportStatus::Completed as StatusId,
];

impl From<ImportState> for ImportStatus {
    fn from(state: ImportState) -> Self {
        match state {
            ImportState::Ready => Self::Ready,
            ImportState::Processing => Self::Processing,
            ImportState::Error => Self::Error,
            ImportState::Stopped => Self::Stopped,
            ImportState::Completed => Self::Completed,
        }
    }
}

impl From<ImportStatus> for ImportState {
    fn from(status: ImportStatus) -> Self {
        match status {
            ImportStatus::Ready => Self::Ready,
            ImportStatus::Processing => Self::Processing,
            ImportStatus::Error => Self::Error,
            ImportStatus::Stopped => Self::Stopped,
            ImportStatus::Completed => Self::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_match_seed_order() {
        assert_eq!(ImportStatus::Ready.id(), 1);
        assert_eq!(ImportStatus::Completed.id(), 5);
        assert_eq!(ImportStatus::from_id(4), Some(ImportStatus::Stopped));
        assert_eq!(ImportStatus::from_id(9), None);
    }

    #[test]
    fn terminal_statuses_agree_with_state_machine() {
        for id in 1..=5 {
            let status = ImportStatus::from_id(id).unwrap();
            let state = ImportState::from(status);
            assert_eq!(TERMINAL_IMPORT_STATUSES.contains(&id), state.is_terminal());
            assert_eq!(ImportStatus::from(state), status);
        }
    }
}
