//! Built-in rewrite profiles for `gui.rpy` and `screens.rpy`.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::config::ScaleSection;
use crate::patch::Patch;
use crate::rewrite::{
    FileRewriteReport, Registry, RewriteOptions, RewriteProfile, ScaleRule, rewrite_file,
};
use crate::runtime::ResolvedPaths;

const RATIO_KEYS: &[&str] = &[
    "gui.textbox_height",
    "gui.name_xpos",
    "gui.name_ypos",
    "gui.dialogue_xpos",
    "gui.dialogue_ypos",
    "gui.dialogue_width",
    "gui.choice_button_width",
    "gui.slot_button_width",
    "gui.slot_button_height",
    "config.thumbnail_width",
    "config.thumbnail_height",
    "gui.navigation_xpos",
    "gui.skip_ypos",
    "gui.notify_ypos",
    "gui.choice_spacing",
    "gui.navigation_spacing",
    "gui.pref_spacing",
    "gui.slot_spacing",
    "gui.history_name_xpos",
    "gui.history_name_ypos",
    "gui.history_name_width",
];

const RATIO_KEYS_AFTER_HISTORY: &[&str] = &[
    "gui.history_text_ypos",
    "gui.history_text_width",
    "gui.nvl_name_width",
    "gui.nvl_text_xpos",
    "gui.nvl_text_ypos",
    "gui.nvl_text_width",
    "gui.nvl_thought_xpos",
    "gui.nvl_thought_width",
    "gui.nvl_button_xpos",
    "gui.bar_size",
    "gui.scrollbar_size",
    "gui.slider_size",
];

/// Font sizes shrink less than the layout so text stays readable.
const FONT_KEYS: &[(&str, i64, f64)] = &[
    ("gui.text_size", 18, 0.9),
    ("gui.name_text_size", 22, 0.87),
    ("gui.interface_text_size", 18, 0.9),
    ("gui.label_text_size", 20, 0.9),
    ("gui.notify_text_size", 14, 0.9),
    ("gui.title_text_size", 40, 0.9),
];

const BORDERS_KEYS: &[&str] = &[
    "gui.namebox_borders",
    "gui.button_borders",
    "gui.radio_button_borders",
    "gui.check_button_borders",
    "gui.page_button_borders",
    "gui.quick_button_borders",
    "gui.choice_button_borders",
    "gui.slot_button_borders",
    "gui.frame_borders",
    "gui.confirm_frame_borders",
    "gui.skip_frame_borders",
    "gui.notify_frame_borders",
    "gui.bar_borders",
    "gui.scrollbar_borders",
    "gui.slider_borders",
    "gui.vbar_borders",
    "gui.vscrollbar_borders",
    "gui.vslider_borders",
    "gui.nvl_borders",
];

const SCREEN_KEYWORDS: &[&str] = &[
    "xsize",
    "top_padding",
    "bottom_padding",
    "left_margin",
    "right_margin",
];

pub const SAY_SCROLL_MARKER: &str = "# PS Vita: Add viewport for long text scrolling";
const SAY_TEXT_ANCHOR: &str = r#"text what id "what""#;
const SAY_SCROLL_BLOCK: &str = r#"# PS Vita: Add viewport for long text scrolling
        if not isinstance(SideImage(), Null):
            viewport:
                id "dialogue_viewport"
                xpos int(gui.dialogue_xpos * 0.7)  # Reduce left margin
                xsize int(gui.dialogue_width * 1.2) - 90
                ypos int(gui.dialogue_ypos * 0.5)  # Reduce top margin
                ysize int((gui.textbox_height - gui.dialogue_ypos) * 0.9) - 5  # Reduce bottom margin

                scrollbars None
                mousewheel True
                draggable True

                text what id "what":
                    xsize None  # Override say_dialogue style xsize limit
        else:
            viewport:
                id "dialogue_viewport"
                xpos int(gui.dialogue_xpos * 0.7)  # Reduce left margin
                xsize int(gui.dialogue_width * 1.2)
                ypos int(gui.dialogue_ypos * 0.5)  # Reduce top margin
                ysize int((gui.textbox_height - gui.dialogue_ypos) * 0.9) - 5  # Reduce bottom margin

                scrollbars None
                mousewheel True
                draggable True

                text what id "what":
                    xsize None  # Override say_dialogue style xsize limit"#;

pub fn gui_registry(scale: &ScaleSection) -> Registry {
    let mut registry = Registry::new(scale.gui_ratio);
    for key in RATIO_KEYS {
        registry = registry.assignment(key, ScaleRule::Ratio);
    }
    registry = registry.assignment("gui.history_text_xpos", ScaleRule::Factor { factor: 0.5 });
    for key in RATIO_KEYS_AFTER_HISTORY {
        registry = registry.assignment(key, ScaleRule::Ratio);
    }
    for (key, floor, factor) in FONT_KEYS {
        registry = registry.assignment(
            key,
            ScaleRule::Clamped {
                floor: *floor,
                factor: *factor,
            },
        );
    }
    for key in BORDERS_KEYS {
        registry = registry.borders(key);
    }
    registry.resolution(
        (scale.source_width, scale.source_height),
        (scale.target_width, scale.target_height),
    )
}

pub fn screens_registry(scale: &ScaleSection) -> Registry {
    SCREEN_KEYWORDS
        .iter()
        .fold(Registry::new(scale.gui_ratio), |registry, keyword| {
            registry.keyword(keyword, ScaleRule::Ratio)
        })
}

pub fn say_scroll_patch() -> Patch {
    Patch::replace_all(
        "scrollable say screen viewport",
        SAY_TEXT_ANCHOR,
        SAY_SCROLL_BLOCK,
    )
    .guarded(&[SAY_SCROLL_MARKER, r#"id "dialogue_viewport""#])
    .first_only()
}

pub fn gui_profile(scale: &ScaleSection) -> RewriteProfile {
    RewriteProfile {
        registry: gui_registry(scale),
        patches: Vec::new(),
    }
}

pub fn screens_profile(scale: &ScaleSection) -> RewriteProfile {
    RewriteProfile {
        registry: screens_registry(scale),
        patches: vec![say_scroll_patch()],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GuiReport {
    pub gui: FileRewriteReport,
    pub screens: FileRewriteReport,
}

impl GuiReport {
    pub fn total_modifications(&self) -> usize {
        self.gui.modification_count() + self.screens.modification_count()
    }
}

/// Rescale `gui.rpy`, then `screens.rpy`.
/// A missing `gui.rpy` stops before `screens.rpy` is touched.
pub fn optimize_gui(
    paths: &ResolvedPaths,
    scale: &ScaleSection,
    options: RewriteOptions,
) -> Result<GuiReport> {
    info!(
        "scaling GUI by {:.2} for {}x{}",
        scale.gui_ratio, scale.target_width, scale.target_height
    );
    let gui = rewrite_file(&paths.gui_script(), &gui_profile(scale), options)?;
    let screens = rewrite_file(&paths.screens_script(), &screens_profile(scale), options)?;
    Ok(GuiReport { gui, screens })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{gui_registry, optimize_gui, screens_registry};
    use crate::backup::backup_path;
    use crate::config::ScaleSection;
    use crate::error::PortError;
    use crate::rewrite::{RewriteOptions, rewrite_text};
    use crate::runtime::ResolvedPaths;

    const GUI_SAMPLE: &str = "init offset = -2\n\
init python:\n    gui.init(1280, 720)\n\
define gui.text_size = 33\n\
define gui.name_text_size = 45\n\
define gui.textbox_height = 278\n\
define gui.history_text_xpos = 360\n\
define gui.namebox_borders = Borders(5, 5, 5, 5)\n\
define gui.accent_color = '#99ccff'\n";

    const SCREENS_SAMPLE: &str = "screen say(who, what):\n    window:\n        id \"window\"\n\n        text what id \"what\"\n\nstyle navigation_frame:\n    xsize 280\n\nstyle game_menu_outer_frame:\n    top_padding 120\n    bottom_padding 30\n";

    fn project() -> (tempfile::TempDir, ResolvedPaths) {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());
        fs::create_dir_all(&paths.game_dir).expect("create game");
        (temp, paths)
    }

    #[test]
    fn gui_registry_covers_layout_fonts_and_borders() {
        let registry = gui_registry(&ScaleSection::default());
        assert_eq!(registry.borders.len(), 19);
        assert_eq!(registry.numeric.len(), 40);
        assert_eq!(registry.numeric[21].key, "gui.history_text_xpos");

        let output = rewrite_text(GUI_SAMPLE, &registry).expect("rewrite");
        assert!(output.content.contains("gui.init(960, 544)"));
        assert!(output.content.contains("define gui.text_size = 29\n"));
        assert!(output.content.contains("define gui.name_text_size = 39\n"));
        assert!(output.content.contains("define gui.textbox_height = 208\n"));
        assert!(output.content.contains("define gui.history_text_xpos = 180\n"));
        assert!(output.content.contains("Borders(3, 3, 3, 3)"));
        assert!(output.content.contains("'#99ccff'"));
        assert_eq!(output.substitutions.len(), 6);
    }

    #[test]
    fn screens_registry_matches_keywords_regardless_of_value() {
        let registry = screens_registry(&ScaleSection::default());
        let output = rewrite_text("    xsize 920\n    xsize 280\n", &registry).expect("rewrite");
        assert_eq!(output.content, "    xsize 690\n    xsize 210\n");
    }

    #[test]
    fn optimize_gui_rewrites_both_scripts_and_injects_scroll_viewport() {
        let (_temp, paths) = project();
        fs::write(paths.gui_script(), GUI_SAMPLE).expect("write gui");
        fs::write(paths.screens_script(), SCREENS_SAMPLE).expect("write screens");

        let report =
            optimize_gui(&paths, &ScaleSection::default(), RewriteOptions::default()).expect("gui");
        assert_eq!(report.gui.modification_count(), 6);
        assert_eq!(report.screens.substitutions.len(), 3);
        assert_eq!(report.screens.applied_patches.len(), 1);
        assert_eq!(report.total_modifications(), 10);

        let screens = fs::read_to_string(paths.screens_script()).expect("read");
        assert!(screens.contains("id \"dialogue_viewport\""));
        assert!(screens.contains("    xsize 210\n"));
        assert!(screens.contains("top_padding 90\n"));
        assert!(screens.contains("xsize None"));
        assert!(backup_path(&paths.screens_script()).exists());

        let again =
            optimize_gui(&paths, &ScaleSection::default(), RewriteOptions::default())
                .expect("again");
        assert_eq!(again.total_modifications(), 10);
        assert_eq!(fs::read_to_string(paths.screens_script()).expect("read"), screens);
    }

    #[test]
    fn missing_gui_script_stops_before_screens() {
        let (_temp, paths) = project();
        fs::write(paths.screens_script(), SCREENS_SAMPLE).expect("write screens");

        let error = optimize_gui(&paths, &ScaleSection::default(), RewriteOptions::default())
            .expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<PortError>(),
            Some(PortError::MissingFile { .. })
        ));
        assert_eq!(
            fs::read_to_string(paths.screens_script()).expect("read"),
            SCREENS_SAMPLE
        );
        assert!(!backup_path(&paths.screens_script()).exists());
    }
}
