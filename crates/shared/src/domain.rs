use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(ProjectId);
id_newtype!(FrameId);
id_newtype!(LayerId);

pub const DEFAULT_CANVAS_WIDTH: u32 = 1280;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 720;
pub const DEFAULT_FPS: u32 = 12;
pub const DEFAULT_PROJECT_TITLE: &str = "New project";

pub const MAX_CANVAS_SIDE: u32 = 8192;
pub const MAX_FPS: u32 = 120;
pub const MAX_NAME_CHARS: usize = 200;
