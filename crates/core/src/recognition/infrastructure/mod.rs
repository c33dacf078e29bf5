pub mod onnx_landmark_engine;
