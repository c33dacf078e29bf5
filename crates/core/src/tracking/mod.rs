pub mod detection_loop;
pub mod tick_telemetry;
