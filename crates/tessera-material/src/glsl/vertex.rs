//! Vertex and geometry stage text, plus the varying interface shared with
//! the fragment stage.

use tessera_core::material::Deform;

use super::builder::SourceBuilder;
use super::features::{gen_function, FsFeatures, VsFeatures, GEN_FUNCTIONS};
use super::{snippets, Sources, Synth, SynthesisError};

/// One value passed from the vertex stage to the fragment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Varying {
    pub qualifier: &'static str,
    pub ty: &'static str,
    /// Name without the `v`/`g` prefix.
    pub name: &'static str,
}

const fn varying(qualifier: &'static str, ty: &'static str, name: &'static str) -> Varying {
    Varying { qualifier, ty, name }
}

/// Varyings in declaration order.
pub fn varyings(s: &Synth) -> Vec<Varying> {
    let (vs, fs) = (s.vs, s.fs);
    let mut out = Vec::new();
    if vs.contains(VsFeatures::TEX_COORD) {
        out.push(varying("smooth", "vec4", "TexCoord"));
    }
    if vs.contains(VsFeatures::TEX_COORD2) {
        out.push(varying("flat", "vec2", "EntTexCoord"));
    }
    if vs.contains(VsFeatures::COLOR) {
        out.push(varying("smooth", "vec4", "Color"));
    }
    if vs.contains(VsFeatures::ENT_COLOR) {
        out.push(varying("flat", "vec4", "EntColor"));
    }
    if fs.contains(FsFeatures::VERTEX) {
        out.push(varying("smooth", "vec3", "Vertex"));
    }
    if fs.contains(FsFeatures::NORMAL) {
        out.push(varying("smooth", "vec3", "Normal"));
    }
    if fs.contains(FsFeatures::LIGHT_DIR) {
        out.push(varying("flat", "vec4", "LightDir"));
    }
    if s.per_pixel() {
        if fs.contains(FsFeatures::DIFFUSE) {
            out.push(varying("flat", "vec3", "AmbientLight"));
            out.push(varying("flat", "vec3", "DirectedLight"));
        }
    } else {
        if fs.contains(FsFeatures::DIFFUSE) {
            out.push(varying("smooth", "vec3", "Diffuse"));
        }
        if fs.contains(FsFeatures::SPECULAR) {
            out.push(varying("smooth", "float", "Specular"));
        }
        if fs.contains(FsFeatures::REFL_VIEW) {
            out.push(varying("smooth", "vec3", "ReflView"));
        }
    }
    if fs.contains(FsFeatures::SHADER_TIME) {
        out.push(varying("flat", "float", "Shadertime"));
    }
    if fs.contains(FsFeatures::CAMERA_POS) {
        out.push(varying("smooth", "vec3", "CameraPos"));
    }
    if vs.contains(VsFeatures::FOG_NUM) {
        out.push(varying("flat", "float", "FogNum"));
    }
    out
}

/// Declare every varying in all stages. With a geometry stage the
/// fragment side reads the `g` copies through a define.
pub fn emit_varyings(s: &Synth, src: &mut Sources) {
    for v in varyings(s) {
        let (q, t, n) = (v.qualifier, v.ty, v.name);
        src.vs.owned(format!("OUT({q}, {t} v{n});\n"));
        if let Some(gs) = src.gs.as_mut() {
            gs.owned(format!("IN({q}, {t} v{n}[]);\n"));
            gs.owned(format!("OUT({q}, {t} g{n});\n"));
            src.fs.owned(format!("#define v{n} g{n}\n"));
        }
        src.fs.owned(format!("IN({q}, {t} v{n});\n"));
    }
    if s.fs.contains(FsFeatures::TANGENTS) {
        if let Some(gs) = src.gs.as_mut() {
            gs.text("OUT(smooth, vec3 gUTangent);\n");
            gs.text("OUT(smooth, vec3 gVTangent);\n");
            src.fs.text(concat!(
                "#define vUTangent gUTangent\n",
                "#define vVTangent gVTangent\n",
                "IN(smooth, vec3 vUTangent);\n",
                "IN(smooth, vec3 vVTangent);\n",
            ));
        }
    }
}

pub fn emit_inputs(s: &Synth, vs: &mut SourceBuilder) {
    let f = s.vs;
    vs.text("// IN(vec4 aVertex);\n#define aVertex gl_Vertex\n");
    if f.contains(VsFeatures::TEX_COORD) {
        vs.text("// IN(vec4 aTexCoord);\n#define aTexCoord gl_MultiTexCoord0\n");
    }
    if f.intersects(VsFeatures::TEX_COORD2 | VsFeatures::FOG_NUM) {
        vs.text("// IN(vec4 aTexCoord2);\n#define aTexCoord2 gl_MultiTexCoord1\n");
    }
    if f.contains(VsFeatures::COLOR) {
        vs.text("// IN(vec4 aColor);\n#define aColor gl_Color\n");
    }
    if f.contains(VsFeatures::ENT_COLOR) {
        vs.text("IN(vec4 aEntColor);\n");
    }
    if s.md3() || f.contains(VsFeatures::SHADER_TIME) {
        vs.text("IN(vec4 aTimes);\n");
    }
    if !s.md3() && f.contains(VsFeatures::NORMAL) {
        vs.text("// IN(vec3 aNormal);\n#define aNormal gl_Normal\n");
    }
    vs.text("IN(vec4 aTransX);\nIN(vec4 aTransY);\nIN(vec4 aTransZ);\n");
    if f.contains(VsFeatures::ENT_LIGHT) {
        vs.text("IN(vec3 aAmbientLight);\nIN(vec3 aDirectedLight);\n");
    }
    if f.contains(VsFeatures::LIGHT_DIR) {
        vs.text("IN(vec4 aLightDir);\n");
    }
    if f.contains(VsFeatures::CAMERA_POS) {
        vs.text("IN(vec3 aCameraPos);\n");
    }
}

/// Uniforms, globals and helper functions of the vertex stage.
pub fn emit_declarations(s: &Synth, vs: &mut SourceBuilder) {
    if s.md3() {
        if s.caps.texture_buffers {
            vs.text("uniform samplerBuffer texData;\n");
        } else {
            vs.text("uniform sampler2D texData;\n");
        }
    }
    if s.vs.contains(VsFeatures::LIGHT_DIR) && !s.per_pixel() {
        vs.text(concat!(
            "vec3 lightDir;\n",
            "#define ambientLight aAmbientLight\n",
            "#define directedLight aDirectedLight\n",
        ));
    }

    vs.text(snippets::FN_TRANSFORM);
    for (bit, body) in GEN_FUNCTIONS {
        if s.vs.intersects(VsFeatures(bit)) {
            vs.text(body);
        }
    }
    if s.md3() {
        let normals = s.vs.contains(VsFeatures::NORMAL);
        vs.text(match (s.caps.texture_buffers, normals) {
            (true, true) => snippets::FN_FETCH_BUFFER_NORMAL,
            (true, false) => snippets::FN_FETCH_BUFFER,
            (false, true) => snippets::FN_FETCH_TEXTURE_NORMAL,
            (false, false) => snippets::FN_FETCH_TEXTURE,
        });
    }
}

fn emit_wave_call(
    vs: &mut SourceBuilder,
    base: f32,
    amplitude: f32,
    func: tessera_core::material::WaveFunc,
    phase: f32,
) -> Result<(), SynthesisError> {
    vs.float(base).text(" + ").float(amplitude);
    vs.text(" * ").text(gen_function(func)?).text("(").float(phase);
    Ok(())
}

fn emit_deforms(s: &Synth, vs: &mut SourceBuilder) -> Result<(), SynthesisError> {
    for deform in &s.material.deforms {
        match *deform {
            Deform::Wave { spread, wave } => {
                vs.text("  \n  vertex += (");
                emit_wave_call(vs, wave.base, wave.amplitude, wave.func, wave.phase)?;
                vs.text(" + dot(vertex.xyz, vec3(").float(spread).text(")) + ");
                vs.float(wave.frequency).text(" * aTimes.x)) * normal;\n");
            }
            Deform::Normals { frequency, .. } => {
                vs.text("  \n  normal.xyz = normalize(normal.xyz + 0.98*noise3(vec4(vertex.xyz, aTimes.x * ");
                vs.float(frequency).text(")));\n");
            }
            Deform::Bulge { width, height, speed } => {
                vs.text("  \n  vertex += (").float(height);
                vs.text(" * sin(aTexCoord.x * ").float(width);
                vs.text(" + aTimes.x * ").float(speed * 0.001).text(")) * normal;\n");
            }
            Deform::Move { vector, wave } => {
                vs.text("  \n  vertex.xyz += (");
                emit_wave_call(vs, wave.base, wave.amplitude, wave.func, wave.phase)?;
                vs.text(" + ").float(wave.frequency).text(" * aTimes.x)) * vec3(");
                vs.vector(&vector.to_array()).text(");\n");
            }
            _ => return Err(SynthesisError::Unsupported("deform")),
        }
    }
    Ok(())
}

pub fn emit_main(s: &Synth, vs: &mut SourceBuilder) -> Result<(), SynthesisError> {
    let (f, fs) = (s.vs, s.fs);
    vs.text("\nvoid main() {\n  vec4 vertex;\n");
    if f.contains(VsFeatures::NORMAL) {
        vs.text("  vec4 normal;\n");
    }
    if s.md3() {
        // interpolate between two animation frames
        if f.contains(VsFeatures::NORMAL) {
            vs.text(concat!(
                "  vec4 normal1, normal2;\n",
                "  vertex = mix(fetchVertex(aTimes.z, aVertex.zw, normal1),\n",
                "               fetchVertex(aTimes.w, aVertex.zw, normal2),\n",
                "               aTimes.y);\n",
                "  normal = normalize(mix(normal1, normal2, aTimes.y));\n",
            ));
        } else {
            vs.text(concat!(
                "  vertex = mix(fetchVertex(aTimes.z, aVertex.zw),\n",
                "               fetchVertex(aTimes.w, aVertex.zw),\n",
                "               aTimes.y);\n",
            ));
        }
        if f.contains(VsFeatures::TEX_COORD) {
            vs.text("  vTexCoord = aVertex.xyxy;\n");
        }
    } else {
        vs.text("  \n  vertex = vec4(aVertex.xyz, 1.0);\n");
        if f.contains(VsFeatures::NORMAL) {
            vs.text("  normal = vec4(aNormal, 0.0);\n");
        }
        if f.contains(VsFeatures::TEX_COORD) {
            vs.text("  vTexCoord = aTexCoord;\n");
        }
    }
    if f.contains(VsFeatures::TEX_COORD2) {
        vs.text("  vEntTexCoord = aTexCoord2.xy;\n");
    }
    if f.contains(VsFeatures::COLOR) {
        vs.text("  vColor = aColor;\n");
    }
    if f.contains(VsFeatures::ENT_COLOR) {
        vs.text("  vEntColor = aEntColor;\n");
    }
    if fs.contains(FsFeatures::SHADER_TIME) {
        vs.text("  \n  vShadertime = aTimes.x;\n");
    }
    if f.contains(VsFeatures::FOG_NUM) {
        if s.md3() {
            vs.text("  vFogNum = aTexCoord2.z;\n");
        } else {
            vs.text("  vFogNum = aVertex.w + aTexCoord2.z;\n");
        }
    }

    emit_deforms(s, vs)?;

    vs.text("  vertex = vec4(transform4(vertex), 1.0);\n");
    if f.contains(VsFeatures::NORMAL) {
        vs.text("  normal = vec4( transform3( normal.xyz ), 0.0 );\n");
    }
    if fs.contains(FsFeatures::VERTEX) {
        vs.text("  vVertex = vertex.xyz;\n");
    }
    if fs.contains(FsFeatures::NORMAL) {
        vs.text("  \n  vNormal = normal.xyz;\n");
    }
    if fs.contains(FsFeatures::CAMERA_POS) {
        vs.text("  vCameraPos = vertex.xyz - aCameraPos.xyz;\n");
    }
    if f.contains(VsFeatures::LIGHT_DIR) {
        if s.per_pixel() {
            vs.text("  vec3 lightDir = normalize(transform3(aLightDir.xyz));\n");
            if fs.contains(FsFeatures::LIGHT_DIR) {
                vs.text("  vLightDir = vec4(lightDir, aLightDir.w);\n");
            }
        } else {
            vs.text("  lightDir = normalize(transform3(aLightDir.xyz));\n");
        }
    }
    if fs.contains(FsFeatures::DIFFUSE) {
        if s.per_pixel() {
            vs.text("  \n  vAmbientLight  = aAmbientLight;\n  vDirectedLight = aDirectedLight;\n");
        } else {
            vs.text(concat!(
                "  \n",
                "  float diffuse = max(0.0, dot(normal.xyz, lightDir.xyz));\n",
                "  vDiffuse = clamp(aAmbientLight + diffuse * aDirectedLight, 0.0, 1.0);\n",
            ));
        }
    }
    if !s.per_pixel() {
        if fs.contains(FsFeatures::REFL_VIEW) {
            vs.text("  \n  vReflView = reflect(vertex.xyz - aCameraPos, normalize(normal.xyz));\n");
        }
        if fs.contains(FsFeatures::SPECULAR) {
            vs.text(concat!(
                "  vSpecular = max(0.0, 4.0 * dot(lightDir.xyz, normalize(vReflView)) - 3.0);\n",
                "  vSpecular *= vSpecular; vSpecular *= vSpecular; vSpecular *= vSpecular;\n",
            ));
        }
    }
    vs.text("  gl_Position = gl_ModelViewProjectionMatrix * vertex;\n}\n");
    Ok(())
}

/// Geometry main: per-triangle tangents, then copy every varying through.
pub fn emit_geometry_main(s: &Synth, gs: &mut SourceBuilder) {
    gs.text(snippets::GS_MAIN_HEAD);
    for v in varyings(s) {
        if v.name == "TexCoord" {
            continue;
        }
        gs.owned(format!("    g{0} = v{0}[i];\n", v.name));
    }
    gs.text(snippets::GS_MAIN_TAIL);
}
