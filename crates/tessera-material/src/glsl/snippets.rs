//! Fixed GLSL text spliced into generated programs.

pub const FN_GET_LIGHT: &str = concat!(
    "float fresnel(const float f0, const float x) {\n",
    "  float y = 1.0 - x;\n",
    "  float y2 = y * y;\n",
    "  return mix(f0, 1.0, y2 * y2 * y);\n",
    "}\n",
    "\n",
    "void getLight(const vec4 material, const vec3 pos,\n",
    "              const vec3 normal, const vec3 eye,\n",
    "              out vec3 diffuse, out vec4 specular) {\n",
    "  const float inv_pi = 0.318309886;\n",
    "  float exponent = pow(10000.0, material.x);\n",
    "  float normalReflectance = material.y * 0.05 + 0.017;\n",
    "  float NdotE = dot(normal, eye);\n",
    "  vec3  diffuseLight = directedLight * material.z;\n",
    "  vec4  specularLight = vec4(directedLight - diffuseLight, 1.0);\n",
    "  \n",
    "  vec3  L = normalize(lightDir);\n",
    "  float NdotL = max(dot(normal, L), 0.0);\n",
    "  vec3  H = normalize(eye + L);\n",
    "  float G = 0.039 * exponent + 0.085;\n",
    "  \n",
    "  diffuse = ambientLight + directedLight * (1.0 - normalReflectance) * inv_pi * NdotL;\n",
    "  float HdotE = max(dot(H, eye), 0.0);\n",
    "  float HdotN = max(dot(H, normal), 0.0);\n",
    "  float specFactor = G * fresnel(normalReflectance, HdotE) * NdotL;\n",
    "  float specPart = max(specFactor * pow(HdotN, exponent), 0.0);\n",
    "  diffuse += diffuseLight * specPart;\n",
    "  specular = specularLight * specPart;\n",
    "#ifdef SHADER_DLIGHTS\n",
    "  int node = 0, light = 0;\n",
    "  while( node < dlNum ) {\n",
    "    vec4 sphere = dlSpheres[node];\n",
    "    L = sphere.xyz - pos;\n",
    "    if( length(L) <= sphere.w ) {\n",
    "      if( dlLinks[node] == 1 ) {\n",
    "        float attenuation = 0.125 * sphere.w / length(L);\n",
    "        vec3 lightColor = dlColors[light] * (attenuation * attenuation);\n",
    "        L = normalize(L);\n",
    "        NdotL = max(dot(normal, L), 0.0);\n",
    "        H = normalize(eye + L);\n",
    "        G = 0.039 * exponent + 0.085;\n",
    "        \n",
    "        diffuse += lightColor * (1.0 - normalReflectance) * inv_pi * NdotL;\n",
    "        HdotE = max(dot(H, eye), 0.0);\n",
    "        HdotN = max(dot(H, normal), 0.0);\n",
    "        specFactor = G * fresnel(normalReflectance, HdotE) * NdotL;\n",
    "        specPart = max(specFactor * pow(HdotN, exponent), 0.0);\n",
    "        diffuseLight = lightColor * material.z;\n",
    "        specularLight = vec4(lightColor - diffuseLight, 1.0);\n",
    "        diffuse += diffuseLight * specPart;\n",
    "        specular += specularLight * specPart;\n",
    "        light++;\n",
    "      }\n",
    "      node++;\n",
    "    } else {\n",
    "      light += dlLinks[node];\n",
    "      node += max(2 * dlLinks[node] - 1, 1);\n",
    "    }\n",
    "  }\n",
    "#endif\n",
    "}\n\n",
);

pub const FN_GEN_SIN: &str = concat!(
    "float genFuncSin(in float x) {\n",
    "  return sin(6.283185308 * x);\n",
    "}\n\n",
);

pub const FN_GEN_SQUARE: &str = concat!(
    "float genFuncSquare(in float x) {\n",
    "  return sign(fract(x) - 0.5);\n",
    "}\n\n",
);

pub const FN_GEN_TRIANGLE: &str = concat!(
    "float genFuncTriangle(in float x) {\n",
    "  return 4.0 * abs(fract(x - 0.25) - 0.5) - 1.0;\n",
    "}\n\n",
);

pub const FN_GEN_SAWTOOTH: &str = concat!(
    "float genFuncSawtooth(in float x) {\n",
    "  return fract(x);\n",
    "}\n\n",
);

pub const FN_GEN_INVERSE_SAWTOOTH: &str = concat!(
    "float genFuncInverseSawtooth(in float x) {\n",
    "  return 1.0 - fract(x);\n",
    "}\n\n",
);

/// Gradient noise in one dimension.
pub const FN_GEN_NOISE: &str = concat!(
    "float genFuncNoise(in float x) {\n",
    "  vec2 xi = floor(vec2(x, x + 1.0));\n",
    "  vec2 xf = x - xi;\n",
    "  vec2 grad = 4.0 * fract((xi * 34.0 + 1.0) * xi / 289.0) - 2.0;\n",
    "  grad *= xf;\n",
    "  return mix(grad.x, grad.y, xf.x*xf.x*xf.x*(xf.x*(xf.x*6.0-15.0)+10.0));\n",
    "}\n\n",
);

pub const FN_GEN_ROTATE: &str = concat!(
    "mat2 genFuncRotate(in float x) {\n",
    "  vec2 sincos = sin(6.283185308 / 360.0 * vec2(x, x + 90.0));\n",
    "  return mat2(sincos.y, -sincos.x, sincos.x, sincos.y);\n",
    "}\n\n",
);

pub const FN_TRANSFORM: &str = concat!(
    "\n",
    "vec3 transform3(vec3 vector) {\n",
    "  return vec3( dot( aTransX.xyz, vector ),\n",
    "               dot( aTransY.xyz, vector ),\n",
    "               dot( aTransZ.xyz, vector ) );\n",
    "}\n",
    "vec3 transform4(vec4 point) {\n",
    "  return vec3( dot( aTransX, point ),\n",
    "               dot( aTransY, point ),\n",
    "               dot( aTransZ, point ) );\n",
    "}\n",
);

/// Head of the height map ray march; the sampler name and the lookup tail
/// follow. Fixed step count, biased lookups.
pub const FN_HEIGHT_MAP_LINEAR: &str = concat!(
    "vec3 intersectHeightMap(const vec3 start,\n",
    "                        const vec3 dir) {\n",
    "  vec3  tracePos = start;\n",
    "  float diff0, diff1 = 1.0;\n",
    "  float steps = 64.0;\n",
    "  vec3  step = dir / steps;\n",
    "  while( diff1 > 0.0 ) {\n",
    "    diff0 = diff1;\n",
    "    diff1 = tracePos.z - tex2DBias(",
);

pub const FN_HEIGHT_MAP_LINEAR_TAIL: &str = concat!(
    ", tracePos.xy, -99.0).a;\n",
    "    tracePos += step;\n",
    "  }\n",
    "  return tracePos + (diff1 / (diff0 - diff1) - 1.0) * step;\n",
    "}\n",
    "\n",
);

/// Same march with an explicit level of detail from screen derivatives.
pub const FN_HEIGHT_MAP_LOD: &str = concat!(
    "vec3 intersectHeightMap(const vec3 start,\n",
    "                        const vec3 dir) {\n",
    "  float lod = log2(max(length(dFdx(start.xy)),\n",
    "                       length(dFdy(start.xy))));\n",
    "  vec3  tracePos = start;\n",
    "  float diff0, diff1 = 1.0;\n",
    "  float steps = 64.0;\n",
    "  vec3  step = dir / steps;\n",
    "  while( diff1 > 0.0 ) {\n",
    "    diff0 = diff1;\n",
    "    diff1 = tracePos.z - tex2DLod(",
);

pub const FN_HEIGHT_MAP_LOD_TAIL: &str = concat!(
    ", tracePos.xy, lod).a;\n",
    "    tracePos += step;\n",
    "  }\n",
    "  return tracePos + (diff1 / (diff0 - diff1) - 1.0) * step;\n",
    "}\n",
    "\n",
);

/// MD3 frame fetch from a texture buffer, with normals.
pub const FN_FETCH_BUFFER_NORMAL: &str = concat!(
    "vec4 fetchVertex(const float frameNo, const vec2 offset,\n",
    "                 out vec4 normal) {\n",
    "  int  tc = int(floor(frameNo + offset));\n",
    "  vec4 data = texFetch(texData, tc);\n",
    "  vec4 lo = fract(data);\n",
    "  vec4 hi = floor(data);\n",
    "  normal = vec4((hi.xyz - 128.0) / 127.0, 0.0);\n",
    "  return vec4(lo.xyz * 1024.0 - 512.0,\n",
    "              1.0);\n",
    "}\n\n",
);

pub const FN_FETCH_BUFFER: &str = concat!(
    "vec4 fetchVertex(const float frameNo, const vec2 offset) {\n",
    "  int  tc = int(floor(frameNo + offset));\n",
    "  vec4 data = texFetch(texData, tc);\n",
    "  vec4 lo = fract(data);\n",
    "  return vec4(lo.xyz * 1024.0 - 512.0,\n",
    "              1.0);\n",
    "}\n\n",
);

/// MD3 frame fetch from a 2D texture, with normals.
pub const FN_FETCH_TEXTURE_NORMAL: &str = concat!(
    "vec4 fetchVertex(const float frameNo, const vec2 offset,\n",
    "                 out vec4 normal) {\n",
    "  vec2 tc = vec2(fract(frameNo), floor(frameNo)/1024.0) + offset;\n",
    "  vec4 data = tex2D(texData, tc);\n",
    "  vec4 lo = fract(data);\n",
    "  vec4 hi = floor(data);\n",
    "  normal = vec4((hi.xyz - 128.0) / 127.0, 0.0);\n",
    "  return vec4(lo.xyz * 1024.0 - 512.0,\n",
    "              1.0);\n",
    "}\n\n",
);

pub const FN_FETCH_TEXTURE: &str = concat!(
    "vec4 fetchVertex(const float frameNo, const vec2 offset) {\n",
    "  vec2 tc = vec2(fract(frameNo), floor(frameNo)/1024.0) + offset;\n",
    "  vec4 data = tex2D(texData, tc);\n",
    "  vec4 lo = fract(data);\n",
    "  return vec4(lo.xyz * 1024.0 - 512.0,\n",
    "              1.0);\n",
    "}\n\n",
);

/// Uniform blocks shared with the dlight packer and the fog table.
pub const UNIFORM_BLOCKS: &str = concat!(
    "layout( shared ) uniform dLights {\n",
    "  vec4 dlSpheres[128+127];\n",
    "  vec3 dlColors[128];\n",
    "  int  dlLinks[128+127];\n",
    "  int  dlNum;\n",
    "  vec2 dlDebug;\n",
    "};\n",
    "\n",
    "layout( shared ) uniform fogs {\n",
    "  vec3 lightGridScale;\n",
    "  vec3 lightGridOffset;\n",
    "  vec4 fogColors[256];\n",
    "  vec4 fogPlanes[256];\n",
    "};\n",
    "\n",
    "uniform sampler3D texLightGrid;\n",
    "\n",
);

/// Per-triangle tangent frame, emitted as the head of the geometry main.
pub const GS_MAIN_HEAD: &str = concat!(
    "\n",
    "void main() {\n",
    "  vec3 uTangent, vTangent;\n",
    "  vec3 dpx = vVertex[2] - vVertex[0];\n",
    "  vec3 dpy = vVertex[1] - vVertex[0];\n",
    "  vec2 dtx = vTexCoord[2].xy - vTexCoord[0].xy;\n",
    "  vec2 dty = vTexCoord[1].xy - vTexCoord[0].xy;\n",
    "  float scale = sign(dty.y*dtx.x - dtx.y*dty.x);\n",
    "  vec3 normal = cross( dpx, dpy );\n",
    "  uTangent =  dpx * dty.y - dpy * dtx.y;\n",
    "  vTangent = -dpx * dty.x + dpy * dtx.x;\n",
    "  uTangent -= normal * dot( uTangent, normal );\n",
    "  vTangent -= normal * dot( vTangent, normal );\n",
    "  uTangent = normalize( scale*uTangent );\n",
    "  vTangent = normalize( scale*vTangent );\n",
    "  int i;\n",
    "  for( i = 0; i < 3; i++ ) {\n",
    "    gTexCoord = vTexCoord[i];\n",
);

pub const GS_MAIN_TAIL: &str = concat!(
    "    gUTangent = uTangent;\n",
    "    gVTangent = vTangent;\n",
    "    gl_Position = gl_PositionIn[i];\n",
    "    EmitVertex();\n",
    "  }\n",
    "  EndPrimitive();\n",
    "}\n",
);

/// Tangents from screen-space derivatives when no geometry stage exists.
pub const FS_TANGENTS_FROM_DERIVATIVES: &str = concat!(
    "  vec3 dpx = dFdx(vVertex);\n",
    "  vec3 dpy = dFdy(vVertex);\n",
    "  vec2 dtx = dFdx(vTexCoord.xy);\n",
    "  vec2 dty = dFdy(vTexCoord.xy);\n",
    "  float scale = sign(dty.y*dtx.x - dtx.y*dty.x);\n",
    "  vec3 uTangent =  dpx * dty.y - dpy * dtx.y;\n",
    "  vec3 vTangent = -dpx * dty.x + dpy * dtx.x;\n",
    "  uTangent -= normal * dot( uTangent, normal );\n",
    "  vTangent -= normal * dot( vTangent, normal );\n",
    "  uTangent = normalize( scale*uTangent );\n",
    "  vTangent = normalize( scale*vTangent );\n",
);

pub const FS_PARALLAX: &str = concat!(
    "  vec3 traceVec = vec3(dot(vCameraPos, uTangent),\n",
    "                       dot(vCameraPos, vTangent),\n",
    "                       dot(vCameraPos, normal) * 8.0);\n",
    "  traceVec /= -traceVec.z;\n",
    "  vec3 tracePos = intersectHeightMap(vec3(baseTC, 1.0), traceVec);\n",
    "  baseTC = tracePos.xy;\n",
);

/// Light grid lookup with the vertex normal as fallback direction.
pub const FS_LIGHT_GRID: &str = concat!(
    "  if( lightGridScale.x > 0.0 ) {\n",
    "    vec3 vert = vertex.xyz * lightGridScale - lightGridOffset;\n",
    "    vec4 lg1 = tex3D(texLightGrid, vert);\n",
    "    vec4 lg2 = tex3D(texLightGrid, vec3(vert.xy, 1.0 - vert.z));\n",
    "    ambientLight = lg1.rgb;\n",
    "    directedLight = lg2.rgb;\n",
    "    lightDir.x = 2.0 * lg1.a - 1.0;\n",
    "    lightDir.y = 2.0 * lg2.a - 1.0;\n",
    "    lightDir.z = 1.0 - abs(lightDir.x) - abs(lightDir.y);\n",
    "    if( lightDir.z < 0.0 ) {\n",
    "      lightDir.xy = sign(lightDir.xy) - lightDir.xy;\n",
    "    }\n",
    "    lightDir = normalize(lightDir);\n",
    "  } else {\n",
    "    lightDir = vNormal;\n",
    "    ambientLight = constants.xxx;\n",
    "    directedLight = constants.xxx;\n",
    "  }\n",
);

pub const FS_NO_LIGHT_GRID: &str = concat!(
    "  lightDir = vNormal;\n",
    "  ambientLight = constants.xxx;\n",
    "  directedLight = constants.xxx;\n",
);

pub const FS_FOG: &str = concat!(
    "  int fogNum = int(vFogNum + 0.5);\n",
    "  if( fogNum > 0 ) {\n",
    "    vec4 plane = fogPlanes[fogNum - 1];\n",
    "    vec4 fogCol = fogColors[fogNum - 1];\n",
    "    float fog = dot(plane.xyz, vVertex.xyz) - plane.w;\n",
    "    if( fog > -0.5 ) {\n",
    "      float eyeT = fog - dot(plane.xyz, vCameraPos);\n",
    "      if( eyeT < 0.0 )\n",
    "        fog = fog / (fog - eyeT);\n",
    "      else\n",
    "        fog = 1.0;\n",
    "    } else {\n",
    "      fog = 0.0;\n",
    "    }\n",
    "    fog *= clamp(length(vCameraPos) * fogCol.w, 0.0, 1.0);\n",
    "    dstColorAdd.xyz = mix(dstColorAdd.xyz, fogCol.xyz, fog);\n",
    "  }\n",
);

/// Tile overlay showing the lighting terms, driven by `dlDebug`.
pub const FS_LIGHT_DEBUG: &str = concat!(
    "  if( dlDebug.x > 0.0 ) {\n",
    "    vec2 tileXY = floor(gl_FragCoord.xy * dlDebug);\n",
    "    int  tile = int(tileXY.y) * 4 + int(tileXY.x);\n",
    "    if( tile == 0 ) {\n",
    "      dstColorMult = constants.xxx;\n",
    "      dstColorAdd = ambientLight.rgb;\n",
    "    } else if( tile == 4 ) {\n",
    "      dstColorMult = constants.xxx;\n",
    "      dstColorAdd = directedLight.rgb;\n",
    "    } else if( tile == 8 ) {\n",
    "      dstColorMult = constants.xxx;\n",
    "      dstColorAdd = 0.5 * lightDir.xyz + 0.5;\n",
    "    } else if( tile == 3 ) {\n",
    "      dstColorMult = constants.xxx;\n",
    "      dstColorAdd = diffuse.rgb;\n",
    "    } else if( tile == 7 ) {\n",
    "      dstColorMult = constants.xxx;\n",
    "      dstColorAdd = specular.rgb;\n",
    "    } else if( tile == 11 ) {\n",
    "      dstColorMult = constants.xxx;\n",
    "      dstColorAdd = 0.5 * normal.xyz + 0.5;\n",
    "    }\n",
    "  }\n",
);
