pub mod activity;
pub mod focus;

pub use activity::{
    ActivityWindowBundle, AudioAttention, ImageAttention, TextAttention, TextGroup, VideoAttention,
    WebsiteVisit,
};
pub use focus::{FocusSession, FocusSnapshot, TimeSegment, TopicContext};
