pub(crate) mod misc;

pub(crate) use misc::*;
