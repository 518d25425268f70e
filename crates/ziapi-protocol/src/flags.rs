//! Bit flags for node listing and module chunk headers

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Filters for `list_nodes`; every selected filter must hold.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ListNodesFlags: u32 {
        /// Descend into all levels below the pattern
        const RECURSIVE = 0x01;
        /// Return absolute paths instead of paths relative to the pattern prefix
        const ABSOLUTE = 0x02;
        /// Only leaf nodes
        const LEAVES_ONLY = 0x04;
        /// Only settings (writable configuration) nodes
        const SETTINGS_ONLY = 0x08;
        /// Only streaming nodes
        const STREAMING_ONLY = 0x10;
        /// Only nodes currently subscribed by this session
        const SUBSCRIBED_ONLY = 0x20;
        /// Only channel 0 of each array
        const BASE_CHANNEL = 0x40;
        /// Only nodes that can be read with a get
        const GET_ONLY = 0x80;
    }
}

bitflags! {
    /// Module result chunk header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ChunkFlags: u32 {
        const FINISHED = 0x0000_0001;
        const ROLLMODE = 0x0000_0002;
        const DATALOSS = 0x0000_0004;
        const VALID = 0x0000_0008;
        const DATA = 0x0000_0010;
        const DISPLAY = 0x0000_0020;
        const FREQDOMAIN = 0x0000_0040;
        const SPECTRUM = 0x0000_0080;
        const OVERLAPPED = 0x0000_0100;
        const ROWFINISHED = 0x0000_0200;
        const ONGRIDSAMPLING = 0x0000_0400;
        const ROWREPETITION = 0x0000_0800;
        const PREVIEW = 0x0000_1000;
    }
}
