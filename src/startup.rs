// Startup module - displays banner and module loading status
//
// This module provides a professional startup experience showing:
// - Version info and branding
// - Configuration loaded from file
// - Module loading status with checkmarks

use crate::config::{Config, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// Module loading result for display
pub struct ModuleStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub description: &'static str,
}

/// Print the startup banner and module loading status.
pub fn print_startup(config: &Config) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}council-core{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Council/Agent-0 routing and voting orchestration engine{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}\u{2713}{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    println!("  {DIM}Loading modules...{RESET}");
    for module in module_status(config) {
        print_module_status(&module);
    }
    println!();

    println!("  {MAGENTA}\u{25b8}{RESET} Transport listening on {BOLD}{}{RESET}", config.bind_addr);
    println!("  {MAGENTA}\u{25b8}{RESET} Data dir: {}", config.data_dir.display());
    println!();
}

/// Fixed module roster; every engine component is always on (no feature
/// flags in this crate, unlike the teacher's opt-in observability layers).
fn module_status(config: &Config) -> Vec<ModuleStatus> {
    vec![
        ModuleStatus {
            name: "transport",
            enabled: true,
            description: "Chat/Recall/Health/Metrics HTTP+SSE",
        },
        ModuleStatus {
            name: "intent",
            enabled: true,
            description: "Regex-based intent classification",
        },
        ModuleStatus {
            name: "provider",
            enabled: true,
            description: "Generation backend registry",
        },
        ModuleStatus {
            name: "budget",
            enabled: true,
            description: "Per-request/session/daily cost caps",
        },
        ModuleStatus {
            name: "orchestrator",
            enabled: true,
            description: "Draft + background refinement protocol",
        },
        ModuleStatus {
            name: "specialist+voting",
            enabled: config.refinement.enabled,
            description: "Council panel and fusion",
        },
        ModuleStatus {
            name: "memory",
            enabled: true,
            description: "Recall index + write-behind log",
        },
        ModuleStatus {
            name: "summariser",
            enabled: true,
            description: "Rolling session summary",
        },
        ModuleStatus {
            name: "health",
            enabled: true,
            description: "UpstreamCPU/DraftLatency/BudgetBreach/Backlog",
        },
    ]
}

fn print_module_status(module: &ModuleStatus) {
    use colors::*;

    let (icon, style) = if module.enabled {
        (format!("{GREEN}\u{2713}{RESET}"), "")
    } else {
        (format!("{DIM}\u{25cb}{RESET}"), DIM)
    };

    println!("    {icon} {style}{:<16}{RESET} {DIM}{}{RESET}", module.name, module.description);
}
