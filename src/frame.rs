//! Stack frame canonicalization.

use serde::{Deserialize, Serialize};

use std::sync::Arc;

/// Descriptor marking a synthetic root frame rendered as the bare method name.
pub const SYNTHETIC_ROOT_DESCRIPTOR: &str = "()L;";
/// Descriptor marking a synthetic collapsing frame, forced to the kernel suffix.
pub const SYNTHETIC_KERNEL_DESCRIPTOR: &str = "(Lk;)L;";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Interpreted,
    #[default]
    JitCompiled,
    Inlined,
    Native,
    C1Compiled,
}

impl FrameType {
    pub const ALL: [FrameType; 5] = [
        Self::Interpreted,
        Self::JitCompiled,
        Self::Inlined,
        Self::Native,
        Self::C1Compiled,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Interpreted => "_[0]",
            Self::JitCompiled => "_[j]",
            Self::Inlined => "_[i]",
            Self::Native => "_[k]",
            Self::C1Compiled => "_[1]",
        }
    }

    /// Maps the decoder's frame type label. Unknown labels are JIT compiled.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "interpreted" => Self::Interpreted,
            "inlined" => Self::Inlined,
            "native" | "kernel" | "cpp" => Self::Native,
            "c1 compiled" | "c1_compiled" | "c1" => Self::C1Compiled,
            _ => Self::JitCompiled,
        }
    }
}

/// Strips a known frame-kind suffix, returning the bare text and the suffix.
pub fn split_suffix(frame: &str) -> (&str, Option<&'static str>) {
    for kind in FrameType::ALL {
        let suffix = kind.suffix();
        if let Some(bare) = frame.strip_suffix(suffix) {
            return (bare, Some(suffix));
        }
    }
    (frame, None)
}

/// One undecorated frame as handed over by the event decoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawFrame {
    #[serde(default)]
    pub package: Option<String>,
    #[serde(rename = "class", default)]
    pub class_name: Option<String>,
    pub method: String,
    #[serde(default)]
    pub descriptor: Option<String>,
    #[serde(rename = "type", default)]
    pub frame_type: Option<String>,
    #[serde(default)]
    pub line: Option<i32>,
}

impl RawFrame {
    pub fn kind(&self) -> FrameType {
        self.frame_type
            .as_deref()
            .map(FrameType::from_label)
            .unwrap_or_default()
    }

    pub fn line_number(&self) -> i32 {
        self.line.unwrap_or(-1)
    }

    /// Renders the canonical frame text and interns it.
    pub fn canonicalize(&self) -> Arc<str> {
        crate::intern(&self.render())
    }

    fn render(&self) -> String {
        let descriptor = self.descriptor.as_deref().unwrap_or_default();
        let mut out = String::new();
        if let Some(package) = self.package.as_deref().filter(|p| !p.is_empty()) {
            out.push_str(&package.replace('.', "/"));
            out.push('/');
        }
        if descriptor != SYNTHETIC_ROOT_DESCRIPTOR {
            if let Some(class) = self.class_name.as_deref().filter(|c| !c.is_empty()) {
                out.push_str(&class.replace('.', "/"));
                out.push('.');
            }
        }
        out.push_str(&self.method);
        if descriptor == SYNTHETIC_KERNEL_DESCRIPTOR {
            out.push_str(FrameType::Native.suffix());
        } else {
            out.push_str(self.kind().suffix());
        }
        out
    }
}
