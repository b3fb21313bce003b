//! Ordered literal find/replace patches for game scripts.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::PortError;
use crate::runtime::ResolvedPaths;

pub const PARTICLE_SCRIPT: &str = "snowblossom.rpy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub description: &'static str,
    pub find: &'static str,
    pub replace: &'static str,
    /// Any of these present means the patch is already in place.
    pub applied_markers: &'static [&'static str],
    pub first_only: bool,
}

impl Patch {
    pub const fn replace_all(
        description: &'static str,
        find: &'static str,
        replace: &'static str,
    ) -> Self {
        Self {
            description,
            find,
            replace,
            applied_markers: &[],
            first_only: false,
        }
    }

    pub const fn guarded(mut self, markers: &'static [&'static str]) -> Self {
        self.applied_markers = markers;
        self
    }

    pub const fn first_only(mut self) -> Self {
        self.first_only = true;
        self
    }

    fn is_applied(&self, content: &str) -> bool {
        self.applied_markers
            .iter()
            .any(|marker| content.contains(marker))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatchOutcome {
    pub content: String,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

/// Apply `patches` in order; each sees the output of the previous one.
pub fn apply_patches(content: &str, patches: &[Patch]) -> PatchOutcome {
    let mut outcome = PatchOutcome {
        content: content.to_string(),
        ..PatchOutcome::default()
    };

    for patch in patches {
        if patch.is_applied(&outcome.content) || !outcome.content.contains(patch.find) {
            debug!("patch skipped: {}", patch.description);
            outcome.skipped.push(patch.description.to_string());
            continue;
        }
        outcome.content = if patch.first_only {
            outcome.content.replacen(patch.find, patch.replace, 1)
        } else {
            outcome.content.replace(patch.find, patch.replace)
        };
        outcome.applied.push(patch.description.to_string());
    }

    outcome
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchFileReport {
    pub path: String,
    pub changed: bool,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

pub fn patch_file(path: &Path, patches: &[Patch]) -> Result<PatchFileReport> {
    if !path.is_file() {
        return Err(PortError::MissingFile {
            path: path.to_path_buf(),
        }
        .into());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let outcome = apply_patches(&content, patches);
    let changed = outcome.content != content;
    if changed {
        fs::write(path, &outcome.content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("{}: {} patch(es) applied", path.display(), outcome.applied.len());
    } else {
        info!("{}: already optimized, no changes", path.display());
    }

    Ok(PatchFileReport {
        path: path.to_string_lossy().replace('\\', "/"),
        changed,
        applied: outcome.applied,
        skipped: outcome.skipped,
    })
}

/// Lighten the snow particle effect for the handheld GPU.
pub fn optimize_particles(paths: &ResolvedPaths) -> Result<PatchFileReport> {
    patch_file(&paths.game_dir.join(PARTICLE_SCRIPT), &particle_patches())
}

pub fn particle_patches() -> Vec<Patch> {
    vec![
        Patch::replace_all(
            "default particle count 50 -> 25",
            "max_particles=50",
            "max_particles=25",
        ),
        Patch::replace_all(
            "default depth levels 10 -> 5",
            r#"self.depth = kwargs.get("depth", 10)"#,
            r#"self.depth = kwargs.get("depth", 5)"#,
        ),
        Patch::replace_all(
            "cache screen size on the factory",
            "self.image = self.image_init(image)",
            SCREEN_CACHE,
        )
        .guarded(&["self.screen_width"]),
        Patch::replace_all("local variables in create()", CREATE_BEFORE, CREATE_AFTER),
        Patch::replace_all("cached screen size in update()", UPDATE_BEFORE, UPDATE_AFTER)
            .guarded(&["factory = self.factory"]),
        Patch::replace_all(
            "factory parameter on SnowParticle",
            PARTICLE_INIT_BEFORE,
            PARTICLE_INIT_AFTER,
        )
        .guarded(&["self.factory = factory"]),
        Patch::replace_all(
            "pass factory when creating particles",
            PARTICLE_CALL_BEFORE,
            PARTICLE_CALL_AFTER,
        )
        .guarded(&["SnowParticle(self, self.image"]),
    ]
}

const SCREEN_CACHE: &str = r#"self.image = self.image_init(image)

            # PSVita optimization: cache screen size to avoid per-frame config access
            self.screen_width = renpy.config.screen_width
            self.screen_height = renpy.config.screen_height"#;

const CREATE_BEFORE: &str = r#"        def create(self, particles, st):
            """
            This is internally called every frame by the Particles object to create new particles.
            We'll just create new particles if the number of particles on the screen is
            lower than the max number of particles we can have.
            """
            if particles is None or len(particles) < self.max_particles:
                
                depth = random.randint(1, self.depth)
                
                depth_speed = 1.5-depth/(self.depth+0.0)
                
                return [ SnowParticle(self.image[depth-1],      
                                      random.uniform(-self.wind, self.wind)*depth_speed,  
                                      self.speed*depth_speed,  
                                      random.randint(self.xborder[0], self.xborder[1]), 
                                      random.randint(self.yborder[0], self.yborder[1]), 
                                      ) ]"#;

const CREATE_AFTER: &str = r#"        def create(self, particles, st):
            """
            This is internally called every frame by the Particles object to create new particles.
            We'll just create new particles if the number of particles on the screen is
            lower than the max number we can have.
            """
            if particles is None or len(particles) < self.max_particles:
                # PSVita optimization: use local variables to reduce attribute access
                depth_val = self.depth
                depth = random.randint(1, depth_val)
                depth_speed = 1.5 - depth / (depth_val + 0.0)

                return [ SnowParticle(self.image[depth-1],
                                      random.uniform(-self.wind, self.wind) * depth_speed,
                                      self.speed * depth_speed,
                                      random.randint(self.xborder[0], self.xborder[1]),
                                      random.randint(self.yborder[0], self.yborder[1]),
                                      ) ]"#;

const UPDATE_BEFORE: &str = r#"        def update(self, st):
            """
            Called internally in every frame to update the particle.
            """
            
            
            if self.oldst is None:
                self.oldst = st
            
            lag = st - self.oldst
            self.oldst = st
            
            self.xpos += lag * self.wind
            self.ypos += lag * self.speed
            
            if self.ypos > renpy.config.screen_height or\
            (self.wind< 0 and self.xpos < 0) or (self.wind > 0 and self.xpos > renpy.config.screen_width):
                    return None
            
            return int(self.xpos), int(self.ypos), st, self.image"#;

const UPDATE_AFTER: &str = r#"        def update(self, st):
            """
            Called internally in every frame to update the particle.
            """
            # PSVita optimization: use factory cached screen size
            factory = self.factory

            if self.oldst is None:
                self.oldst = st

            lag = st - self.oldst
            self.oldst = st

            self.xpos += lag * self.wind
            self.ypos += lag * self.speed

            if self.ypos > factory.screen_height or \
               (self.wind < 0 and self.xpos < 0) or \
               (self.wind > 0 and self.xpos > factory.screen_width):
                return None

            return int(self.xpos), int(self.ypos), st, self.image"#;

const PARTICLE_INIT_BEFORE: &str = r#"    class SnowParticle(object):
        """
        Represents every particle in the screen.
        """
        def __init__(self, image, wind, speed, xborder, yborder):
            """
            Initializes the snow particle. This is called automatically when the object is created.
            """
            
            self.image = image"#;

const PARTICLE_INIT_AFTER: &str = r#"    class SnowParticle(object):
        """
        Represents every particle in the screen.
        """
        def __init__(self, factory, image, wind, speed, xborder, yborder):
            """
            Initializes the snow particle. This is called automatically when the object is created.
            """
            self.factory = factory  # PSVita optimization: cache factory reference
            self.image = image"#;

const PARTICLE_CALL_BEFORE: &str = r#"                return [ SnowParticle(self.image[depth-1],
                                      random.uniform(-self.wind, self.wind) * depth_speed,"#;

const PARTICLE_CALL_AFTER: &str = r#"                return [ SnowParticle(self, self.image[depth-1],
                                      random.uniform(-self.wind, self.wind) * depth_speed,"#;

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{
        CREATE_BEFORE, PARTICLE_INIT_BEFORE, Patch, UPDATE_BEFORE, apply_patches,
        optimize_particles, particle_patches, patch_file,
    };
    use crate::error::PortError;
    use crate::runtime::ResolvedPaths;

    fn particle_script() -> String {
        format!(
            "init python:\n    class SnowFactory(object):\n        def __init__(self, image, max_particles=50, speed=150, wind=100, xborder=(0,100), yborder=(50,400), **kwargs):\n            self.depth = kwargs.get(\"depth\", 10)\n            self.image = self.image_init(image)\n\n{CREATE_BEFORE}\n\n{PARTICLE_INIT_BEFORE}\n\n{UPDATE_BEFORE}\n"
        )
    }

    #[test]
    fn patches_apply_in_order_and_skip_missing_anchor() {
        let patches = [
            Patch::replace_all("a to b", "a", "b"),
            Patch::replace_all("b to c", "b", "c"),
            Patch::replace_all("absent", "zzz", "yyy"),
        ];
        let outcome = apply_patches("a a", &patches);
        assert_eq!(outcome.content, "c c");
        assert_eq!(outcome.applied, vec!["a to b", "b to c"]);
        assert_eq!(outcome.skipped, vec!["absent"]);
    }

    #[test]
    fn first_only_patch_touches_one_occurrence() {
        let patches = [Patch::replace_all("first", "x", "y").first_only()];
        assert_eq!(apply_patches("x x", &patches).content, "y x");
    }

    #[test]
    fn guard_marker_skips_applied_patch() {
        let patches = [Patch::replace_all("add", "base", "base marker").guarded(&["marker"])];
        let once = apply_patches("base", &patches);
        let twice = apply_patches(&once.content, &patches);
        assert_eq!(twice.content, "base marker");
        assert!(twice.applied.is_empty());
    }

    #[test]
    fn particle_patch_set_rewrites_script_once() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());
        fs::create_dir_all(&paths.game_dir).expect("create game");
        let script = paths.game_dir.join("snowblossom.rpy");
        fs::write(&script, particle_script()).expect("write");

        let report = optimize_particles(&paths).expect("optimize");
        assert!(report.changed);
        assert_eq!(report.applied.len(), particle_patches().len());

        let patched = fs::read_to_string(&script).expect("read");
        assert!(patched.contains("max_particles=25"));
        assert!(patched.contains(r#"kwargs.get("depth", 5)"#));
        assert!(patched.contains("self.screen_width = renpy.config.screen_width"));
        assert!(patched.contains("SnowParticle(self, self.image[depth-1]"));
        assert!(patched.contains("def __init__(self, factory, image, wind"));
        assert!(patched.contains("factory.screen_height"));

        let again = patch_file(&script, &particle_patches()).expect("second run");
        assert!(!again.changed);
        assert_eq!(fs::read_to_string(&script).expect("read"), patched);
    }

    #[test]
    fn missing_particle_script_fails() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());
        let error = optimize_particles(&paths).expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<PortError>(),
            Some(PortError::MissingFile { .. })
        ));
    }
}
