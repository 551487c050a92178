use serde::{Deserialize, Serialize};

/// Packer behavior: who creates images, and whether packing/cleaning
/// happen eagerly from the writer's own process.
///
/// https://docs.swh.dev/winery/configuration/packer/
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Packer {
    /// The packer itself creates RO images as needed. When `false`, images
    /// are pre-created by the image manager and the packer polls for them.
    ///
    /// _Default:_ `true`
    #[serde(default = "Packer::create_images")]
    pub create_images: bool,

    /// Spawn a packer as soon as a write shard seals, instead of waiting
    /// for the standalone packer daemon to pick it up.
    ///
    /// _Default:_ `false`
    #[serde(default)]
    pub pack_immediately: bool,

    /// Drop the RW shard table as soon as packing finishes, instead of
    /// waiting for the RW-shard cleaner to confirm enough hosts have
    /// mapped the RO image.
    ///
    /// _Default:_ `false`
    #[serde(default)]
    pub clean_immediately: bool,
}

impl Packer {
    fn create_images() -> bool {
        true
    }
}

impl Default for Packer {
    fn default() -> Self {
        Self {
            create_images: Self::create_images(),
            pack_immediately: false,
            clean_immediately: false,
        }
    }
}
