pub mod bitrate;
