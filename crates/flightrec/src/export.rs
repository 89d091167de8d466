//! Export hooks for an external visualization collaborator.
//!
//! The core does not implement the shared-memory scope channel; it only
//! fixes the surface a collaborator plugs into: per-recorder channel
//! descriptors, a subscriber interface yielding `(timestamp, value)` word
//! pairs, and a configuration hook accepting `name=value` tweaks and
//! trace-enablement strings. Each [`crate::Recorder`] carries four opaque
//! handle slots for attached channels (see [`crate::Recorder::attach_export`]).

/// Value interpretation of an export channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportKind {
    #[default]
    None,
    Invalid,
    Signed,
    Unsigned,
    Real,
}

/// Static description of one export channel.
#[derive(Debug, Clone, Copy)]
pub struct ExportInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub min: f64,
    pub max: f64,
    /// Ring capacity of the channel, in `(timestamp, value)` pairs.
    pub capacity: usize,
}

/// Consumer side of an export channel: drains `(timestamp, value)` pairs.
pub trait Subscriber {
    fn info(&self) -> &ExportInfo;
    fn kind(&self) -> ExportKind;
    /// Fills `out` with the next available pairs, returning how many were
    /// delivered.
    fn poll(&mut self, out: &mut [(u64, u64)]) -> usize;
}

/// Command channel hook: the collaborator pushes `name=value` tweaks and
/// trace-enablement strings. Returns whether the command was understood.
pub trait Configurator {
    fn configure(&mut self, command: &str) -> bool;
}

/// Default ring capacity of an export channel, in pairs.
pub const EXPORT_SIZE: usize = 2048;

/// Layout version of the export channel area.
pub const EXPORT_VERSION: (u16, u16, u16) = (0, 1, 0);

/// Magic word at the head of an export area; distinguishes word sizes so a
/// 32-bit scope does not misread a 64-bit process.
#[cfg(target_pointer_width = "64")]
pub const EXPORT_MAGIC: u32 = 0x666C_7238; // "flr8"
#[cfg(not(target_pointer_width = "64"))]
pub const EXPORT_MAGIC: u32 = 0x666C_7234; // "flr4"

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingChannel {
        info: ExportInfo,
        next: u64,
    }

    impl Subscriber for CountingChannel {
        fn info(&self) -> &ExportInfo {
            &self.info
        }

        fn kind(&self) -> ExportKind {
            ExportKind::Unsigned
        }

        fn poll(&mut self, out: &mut [(u64, u64)]) -> usize {
            for pair in out.iter_mut() {
                *pair = (self.next, self.next * 10);
                self.next += 1;
            }
            out.len()
        }
    }

    #[test]
    fn subscriber_surface_is_usable() {
        let mut chan = CountingChannel {
            info: ExportInfo {
                name: "ticks",
                description: "test channel",
                unit: "count",
                min: 0.0,
                max: 100.0,
                capacity: EXPORT_SIZE,
            },
            next: 0,
        };
        let mut pairs = [(0u64, 0u64); 4];
        assert_eq!(chan.poll(&mut pairs), 4);
        assert_eq!(pairs[3], (3, 30));
        assert_eq!(chan.info().unit, "count");
        assert_eq!(chan.kind(), ExportKind::Unsigned);
    }

    #[test]
    fn recorder_holds_four_export_handles() {
        crate::recorder!(EXPORT_HANDLES, 8, "export handles");
        assert!(EXPORT_HANDLES.export(0).is_null());
        let mut token = 7u32;
        EXPORT_HANDLES.attach_export(2, std::ptr::addr_of_mut!(token).cast());
        assert!(!EXPORT_HANDLES.export(2).is_null());
        assert!(EXPORT_HANDLES.export(3).is_null());
    }
}
