//! User-Friendly Error Formatting
//!
//! Renders top-level errors with a short explanation and troubleshooting
//! hints matched on the error chain.

use std::fmt::Write;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Format an error for the terminal
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    writeln!(output).ok();
    writeln!(output, "╔════════════════════════════════════════════════════════════╗").ok();
    writeln!(output, "║                     ERROR                                  ║").ok();
    writeln!(output, "╚════════════════════════════════════════════════════════════╝").ok();
    writeln!(output).ok();

    // Match on the whole chain so context layers do not hide the cause
    let chain = format!("{:#}", error);
    let lower = chain.to_lowercase();

    if lower.contains("config") || (lower.contains("track") && lower.contains("out of bounds")) {
        format_config_error(&mut output);
    } else if lower.contains("capture") || lower.contains("frame") || lower.contains("image") {
        format_capture_error(&mut output);
    } else if lower.contains("slot") || lower.contains("touch") {
        format_touch_error(&mut output);
    } else if lower.contains("template") || lower.contains("state") {
        format_state_error(&mut output);
    } else {
        format_generic_error(&mut output);
    }

    writeln!(output).ok();
    writeln!(output, "{}", RULE).ok();
    writeln!(output, "Technical Details:").ok();
    writeln!(output).ok();
    writeln!(output, "{}", chain).ok();
    writeln!(output).ok();
    writeln!(output, "{}", RULE).ok();
    writeln!(output, "Need Help?").ok();
    writeln!(output, "  - Run with --verbose for detailed logs: rhythm-autoplay -vvv <command>").ok();
    writeln!(output, "  - Print the effective configuration: rhythm-autoplay check-config").ok();

    output
}

fn format_config_error(output: &mut String) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "The configuration could not be loaded or does not fit the display.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Invalid TOML syntax or value type").ok();
    writeln!(output, "     → Speeds are written as \"x6\", \"x8\", \"x9\", \"x10\" or \"x11\"").ok();
    writeln!(output, "     → Colors are written as [r, g, b]").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Track geometry outside the display").ok();
    writeln!(output, "     → hit_line_y and the corridor rows must lie on screen").ok();
    writeln!(output, "     → Defaults are calibrated for 1280x720 captures").ok();
    writeln!(output).ok();
    writeln!(output, "  3. Inverted detection corridor").ok();
    writeln!(output, "     → check_upper_y must be smaller than check_lower_y").ok();
}

fn format_capture_error(output: &mut String) {
    writeln!(output, "Screen Capture Error").ok();
    writeln!(output).ok();
    writeln!(output, "Frames could not be read.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Frame directory empty or unreadable").ok();
    writeln!(output, "     → Supported formats: png, jpg, bmp").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Frames of different sizes in one directory").ok();
    writeln!(output, "     → Every replayed frame must match the first one").ok();
}

fn format_touch_error(output: &mut String) {
    writeln!(output, "Touch Scheduling Error").ok();
    writeln!(output).ok();
    writeln!(output, "A gesture could not be scheduled or injected.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Too few touch slots").ok();
    writeln!(output, "     → play.hold_cnt fingers stay down for the whole song").ok();
    writeln!(output, "     → Lower hold_cnt or raise the sink's slot count").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Invalid gesture program").ok();
    writeln!(output, "     → Chart times must not go backwards within one lane gesture").ok();
}

fn format_state_error(output: &mut String) {
    writeln!(output, "Screen State Template Error").ok();
    writeln!(output).ok();
    writeln!(output, "The screen-state templates could not be loaded.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Template image not named <x>_<y>.png").ok();
    writeln!(output, "  2. Malformed state.json (expects \"buttons\" and \"points\")").ok();
}

fn format_generic_error(output: &mut String) {
    writeln!(output, "Unexpected Error").ok();
    writeln!(output).ok();
    writeln!(output, "Troubleshooting:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Re-run with -vvv and inspect the log").ok();
    writeln!(output, "  2. Validate the configuration with check-config").ok();
}
