use ash::vk;

/// Lowest validation-layer severity forwarded to `tracing`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl VulkanLogLevel {
    /// Severity mask covering this level and everything above it.
    pub fn severity_flags(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Sev;
        match self {
            VulkanLogLevel::Verbose => {
                Sev::VERBOSE | Sev::INFO | Sev::WARNING | Sev::ERROR
            }
            VulkanLogLevel::Info => Sev::INFO | Sev::WARNING | Sev::ERROR,
            VulkanLogLevel::Warning => Sev::WARNING | Sev::ERROR,
            VulkanLogLevel::Error => Sev::ERROR,
        }
    }
}
