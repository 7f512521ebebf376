//! Stage folding for targets without program synthesis.

use tessera_core::constants::NUM_TEXTURE_BUNDLES;
use tessera_core::material::{sort, AlphaGen, ColorGen, MultitextureEnv, TcGen, WaveFunc};
use tessera_core::{LightmapIndex, Material, Stage, StateBits};

struct Collapse {
    first: StateBits,
    second: StateBits,
    env: MultitextureEnv,
    blend: StateBits,
}

const fn bits(src: StateBits, dst: StateBits) -> StateBits {
    StateBits(src.0 | dst.0)
}

const MODULATE: StateBits = bits(StateBits::SRCBLEND_DST_COLOR, StateBits::DSTBLEND_ZERO);
const MODULATE_SRC: StateBits = bits(StateBits::SRCBLEND_ZERO, StateBits::DSTBLEND_SRC_COLOR);
const ADD: StateBits = bits(StateBits::SRCBLEND_ONE, StateBits::DSTBLEND_ONE);

/// Blend pairs that one pass with two texture units reproduces.
const COLLAPSE_TABLE: [Collapse; 8] = [
    Collapse { first: StateBits::NONE, second: MODULATE_SRC, env: MultitextureEnv::Modulate, blend: StateBits::NONE },
    Collapse { first: StateBits::NONE, second: MODULATE, env: MultitextureEnv::Modulate, blend: StateBits::NONE },
    Collapse { first: MODULATE, second: MODULATE, env: MultitextureEnv::Modulate, blend: MODULATE },
    Collapse { first: MODULATE_SRC, second: MODULATE, env: MultitextureEnv::Modulate, blend: MODULATE },
    Collapse { first: MODULATE, second: MODULATE_SRC, env: MultitextureEnv::Modulate, blend: MODULATE },
    Collapse { first: MODULATE_SRC, second: MODULATE_SRC, env: MultitextureEnv::Modulate, blend: MODULATE },
    Collapse { first: StateBits::NONE, second: ADD, env: MultitextureEnv::Add, blend: StateBits::NONE },
    Collapse { first: ADD, second: ADD, env: MultitextureEnv::Add, blend: ADD },
];

const FOLDABLE: StateBits = StateBits(StateBits::BLEND_BITS.0 | StateBits::DEPTHMASK_TRUE.0);

fn find_collapse(a: &Stage, b: &Stage, env_add: bool) -> Option<&'static Collapse> {
    if a.state & !FOLDABLE != b.state & !FOLDABLE {
        return None;
    }
    let (abits, bbits) = (a.state.blend(), b.state.blend());
    let entry = COLLAPSE_TABLE
        .iter()
        .find(|c| c.first == abits && c.second == bbits)?;

    if entry.env == MultitextureEnv::Add && !env_add {
        return None;
    }
    if a.rgb_gen != b.rgb_gen || a.alpha_gen != b.alpha_gen {
        return None;
    }
    if entry.env == MultitextureEnv::Add && a.rgb_gen != ColorGen::Identity {
        return None;
    }
    if a.rgb_gen == ColorGen::Waveform && a.rgb_wave != b.rgb_wave {
        return None;
    }
    if a.alpha_gen == AlphaGen::Waveform && a.alpha_wave != b.alpha_wave {
        return None;
    }
    Some(entry)
}

/// Fold adjacent stage pairs into multitexture passes, using up to `units`
/// texture units per pass. Returns the resulting stage count.
pub fn collapse_multitexture(stages: &mut Vec<Stage>, units: u32, env_add: bool) -> usize {
    let units = (units as usize).min(NUM_TEXTURE_BUNDLES);
    let mut stage = 0;
    let mut bundle = 0;

    while stage < stages.len() {
        if bundle + 1 >= units || stage + 1 >= stages.len() {
            stage += 1;
            bundle = 0;
            continue;
        }
        let Some(entry) = find_collapse(&stages[stage], &stages[stage + 1], env_add) else {
            stage += 1;
            bundle = 0;
            continue;
        };

        let next = stages.remove(stage + 1);
        let [folded, ..] = next.bundles;
        let target = &mut stages[stage];
        // lightmaps always sit in the second unit
        if bundle == 0 && target.bundles[0].is_lightmap {
            let lightmap = std::mem::replace(&mut target.bundles[0], folded);
            target.bundles[1] = lightmap;
        } else {
            target.bundles[bundle + 1] = folded;
        }
        target.bundles[bundle + 1].multitexture_env = entry.env;
        target.state = target.state.with(StateBits::BLEND_BITS, entry.blend);
        bundle += 1;
        log::trace!("folded stage {} into multitexture pass {stage}", stage + 1);
    }

    stages.len()
}

fn vertex_light_rank(stage: &Stage) -> i32 {
    let b = &stage.bundles[0];
    let mut rank = 0;
    if b.is_lightmap {
        rank -= 100;
    }
    if b.tc_gen != TcGen::Texture {
        rank -= 5;
    }
    if !b.tex_mods.is_empty() {
        rank -= 5;
    }
    if !matches!(stage.rgb_gen, ColorGen::Identity | ColorGen::IdentityLighting) {
        rank -= 3;
    }
    rank
}

fn is_wave(stage: &Stage, func: WaveFunc) -> bool {
    stage.rgb_gen == ColorGen::Waveform && stage.rgb_wave.func == func
}

/// Reduce a material to one vertex-lit pass approximating its look.
pub fn vertex_light_collapse(material: &mut Material) {
    if material.stages.is_empty() {
        return;
    }

    if material.sort == sort::OPAQUE {
        let mut best = 0;
        let mut best_rank = i32::MIN;
        for (i, stage) in material.stages.iter().enumerate() {
            let rank = vertex_light_rank(stage);
            if rank > best_rank {
                best_rank = rank;
                best = i;
            }
        }
        let bundle = material.stages[best].bundles[0].clone();
        let lit = if material.lightmap == LightmapIndex::None {
            ColorGen::LightingDiffuse
        } else {
            ColorGen::ExactVertex
        };
        let s = &mut material.stages[0];
        s.bundles[0] = bundle;
        s.state = s.state.with(StateBits::BLEND_BITS, StateBits::NONE) | StateBits::DEPTHMASK_TRUE;
        s.rgb_gen = lit;
        s.alpha_gen = AlphaGen::Skip;
    } else {
        // no lightmap pass under vertex lighting
        if material.stages[0].bundles[0].is_lightmap && material.stages.len() > 1 {
            material.stages.remove(0);
        }
        let second = material.stages.get(1).cloned().unwrap_or_default();
        let s = &material.stages[0];
        let cross_fade = s.rgb_gen == ColorGen::OneMinusEntity
            || second.rgb_gen == ColorGen::OneMinusEntity
            || (is_wave(s, WaveFunc::Sawtooth) && is_wave(&second, WaveFunc::InverseSawtooth))
            || (is_wave(s, WaveFunc::InverseSawtooth) && is_wave(&second, WaveFunc::Sawtooth));
        if cross_fade {
            material.stages[0].rgb_gen = ColorGen::IdentityLighting;
        }
    }

    material.stages.truncate(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::material::{TexMod, Waveform};
    use tessera_core::{ImageId, TextureBundle};

    fn stage(image: u32, blend: StateBits) -> Stage {
        let mut s = Stage {
            rgb_gen: ColorGen::Identity,
            alpha_gen: AlphaGen::Skip,
            state: blend | StateBits::DEPTHMASK_TRUE,
            ..Default::default()
        };
        s.bundles[0] = TextureBundle {
            images: vec![ImageId(image)],
            tc_gen: TcGen::Texture,
            ..Default::default()
        };
        s
    }

    fn lightmap_stage(image: u32) -> Stage {
        let mut s = stage(image, StateBits::NONE);
        s.bundles[0].is_lightmap = true;
        s.bundles[0].tc_gen = TcGen::Lightmap;
        s
    }

    fn sorted_images(stages: &[Stage]) -> Vec<ImageId> {
        let mut v: Vec<_> = stages.iter().flat_map(|s| s.images()).collect();
        v.sort();
        v
    }

    #[test]
    fn test_lightmap_moves_to_second_bundle() {
        let mut stages = vec![lightmap_stage(7), stage(3, MODULATE)];
        let before = sorted_images(&stages);
        assert_eq!(collapse_multitexture(&mut stages, 2, true), 1);
        let s = &stages[0];
        assert_eq!(s.bundles[0].image(), Some(ImageId(3)));
        assert_eq!(s.bundles[1].image(), Some(ImageId(7)));
        assert!(s.bundles[1].is_lightmap);
        assert_eq!(s.bundles[1].multitexture_env, MultitextureEnv::Modulate);
        assert_eq!(s.state.blend(), StateBits::NONE);
        assert_eq!(sorted_images(&stages), before);
    }

    #[test]
    fn test_modulate_pair_keeps_blend() {
        let mut stages = vec![stage(1, MODULATE), stage(2, MODULATE_SRC)];
        assert_eq!(collapse_multitexture(&mut stages, 4, true), 1);
        assert_eq!(stages[0].state.blend(), MODULATE);
        assert_eq!(stages[0].bundles[1].image(), Some(ImageId(2)));
    }

    #[test]
    fn test_add_requires_capability() {
        let mut stages = vec![stage(1, StateBits::NONE), stage(2, ADD)];
        assert_eq!(collapse_multitexture(&mut stages, 2, false), 2);

        let mut stages = vec![stage(1, StateBits::NONE), stage(2, ADD)];
        assert_eq!(collapse_multitexture(&mut stages, 2, true), 1);
        assert_eq!(stages[0].bundles[1].multitexture_env, MultitextureEnv::Add);
    }

    #[test]
    fn test_add_requires_identity_colour() {
        let mut a = stage(1, StateBits::NONE);
        let mut b = stage(2, ADD);
        a.rgb_gen = ColorGen::Vertex;
        b.rgb_gen = ColorGen::Vertex;
        let mut stages = vec![a, b];
        assert_eq!(collapse_multitexture(&mut stages, 2, true), 2);
    }

    #[test]
    fn test_single_unit_never_folds() {
        let mut stages = vec![lightmap_stage(7), stage(3, MODULATE)];
        assert_eq!(collapse_multitexture(&mut stages, 1, true), 2);
        assert_eq!(stages[0].bundles[1].images, Vec::<ImageId>::new());
    }

    #[test]
    fn test_mismatched_state_or_waves_block_fold() {
        let a = stage(1, StateBits::NONE);
        let mut b = stage(2, MODULATE);
        b.state |= StateBits::DEPTHFUNC_EQUAL;
        let mut stages = vec![a.clone(), b];
        assert_eq!(collapse_multitexture(&mut stages, 2, true), 2);

        let mut a = a;
        let mut b = stage(2, MODULATE);
        let wave = Waveform {
            func: WaveFunc::Sin,
            amplitude: 1.0,
            ..Default::default()
        };
        a.rgb_gen = ColorGen::Waveform;
        a.rgb_wave = wave;
        b.rgb_gen = ColorGen::Waveform;
        b.rgb_wave = Waveform { base: 0.5, ..wave };
        let mut stages = vec![a, b];
        assert_eq!(collapse_multitexture(&mut stages, 2, true), 2);
    }

    #[test]
    fn test_later_pairs_fold_after_a_miss() {
        let blend = bits(StateBits::SRCBLEND_SRC_ALPHA, StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA);
        let mut stages = vec![stage(1, StateBits::NONE), stage(2, blend), stage(3, blend), stage(4, StateBits::NONE)];
        // (none, blend) and (blend, blend) have no entry; nothing folds
        assert_eq!(collapse_multitexture(&mut stages, 2, true), 4);

        let mut stages = vec![stage(1, blend), stage(2, StateBits::NONE), stage(3, MODULATE), stage(4, MODULATE)];
        let before = sorted_images(&stages);
        // two units per pass: stage 4 cannot join the folded pair
        assert_eq!(collapse_multitexture(&mut stages, 2, true), 3);
        assert_eq!(stages[1].bundles[0].image(), Some(ImageId(2)));
        assert_eq!(stages[1].bundles[1].image(), Some(ImageId(3)));
        assert_eq!(sorted_images(&stages), before);
    }

    #[test]
    fn test_vertex_light_collapse_opaque_picks_best() {
        let mut tc_mod = stage(9, MODULATE);
        tc_mod.bundles[0].tex_mods.push(TexMod::Scroll([1.0, 0.0]));
        let mut m = Material {
            sort: sort::OPAQUE,
            lightmap: LightmapIndex::Index(0),
            stages: vec![lightmap_stage(7), stage(3, MODULATE), tc_mod],
            ..Default::default()
        };
        vertex_light_collapse(&mut m);
        assert_eq!(m.stages.len(), 1);
        let s = &m.stages[0];
        assert_eq!(s.bundles[0].image(), Some(ImageId(3)));
        assert_eq!(s.rgb_gen, ColorGen::ExactVertex);
        assert_eq!(s.alpha_gen, AlphaGen::Skip);
        assert_eq!(s.state.blend(), StateBits::NONE);
        assert!(s.state.contains(StateBits::DEPTHMASK_TRUE));
    }

    #[test]
    fn test_vertex_light_collapse_translucent_drops_lightmap() {
        let mut a = stage(3, ADD);
        a.rgb_gen = ColorGen::OneMinusEntity;
        let mut m = Material {
            sort: sort::BLEND0,
            stages: vec![lightmap_stage(7), a, stage(4, ADD)],
            ..Default::default()
        };
        vertex_light_collapse(&mut m);
        assert_eq!(m.stages.len(), 1);
        assert_eq!(m.stages[0].bundles[0].image(), Some(ImageId(3)));
        assert_eq!(m.stages[0].rgb_gen, ColorGen::IdentityLighting);
    }
}
