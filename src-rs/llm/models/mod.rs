// Provider client and wire codec

pub mod gemini;
