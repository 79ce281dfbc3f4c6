use crate::backend::{ColoredQuad, TexturedQuad};
use crate::compositor_error;
use crate::error::Result;
use glow::HasContext;
use smallvec::SmallVec;

const VS_COLORED_SRC: &str = r#"
    #version 120
    attribute vec2 position;
    attribute vec3 color;
    uniform vec2 viewport;
    varying vec3 v_color;
    void main() {
        vec2 ndc = position / viewport * 2.0 - 1.0;
        gl_Position = vec4(ndc.x, -ndc.y, 0.0, 1.0);
        v_color = color;
    }
"#;

const FS_COLORED_SRC: &str = r#"
    #version 120
    varying vec3 v_color;
    void main() {
        gl_FragColor = vec4(v_color, 1.0);
    }
"#;

const VS_TEXTURED_SRC: &str = r#"
    #version 120
    attribute vec2 position;
    attribute vec2 tex_coord;
    uniform vec2 viewport;
    varying vec2 v_tex_coord;
    void main() {
        vec2 ndc = position / viewport * 2.0 - 1.0;
        gl_Position = vec4(ndc.x, -ndc.y, 0.0, 1.0);
        v_tex_coord = tex_coord;
    }
"#;

const FS_RECTANGLE_SRC: &str = r#"
    #version 120
    #extension GL_ARB_texture_rectangle : require
    uniform sampler2DRect image;
    varying vec2 v_tex_coord;
    void main() {
        gl_FragColor = texture2DRect(image, v_tex_coord);
    }
"#;

const FS_TEXTURE_2D_SRC: &str = r#"
    #version 120
    uniform sampler2D image;
    varying vec2 v_tex_coord;
    void main() {
        gl_FragColor = texture2D(image, v_tex_coord);
    }
"#;

const POSITION_LOCATION: u32 = 0;
const ATTRIBUTE_LOCATION: u32 = 1;

/// Программа для квада из четырёх вершин: позиция и один атрибут
pub struct QuadProgram {
    program: glow::Program,
    viewport: Option<glow::UniformLocation>,
    components: i32,
}

impl QuadProgram {
    fn new(gl: &glow::Context, vs: &str, fs: &str, attribute: &str, components: i32) -> Result<Self> {
        unsafe {
            let vertex = compile_shader(gl, glow::VERTEX_SHADER, vs)?;
            let fragment = match compile_shader(gl, glow::FRAGMENT_SHADER, fs) {
                Ok(shader) => shader,
                Err(e) => {
                    gl.delete_shader(vertex);
                    return Err(e);
                }
            };

            let program = gl
                .create_program()
                .map_err(|e| compositor_error!(graphics_setup, "glCreateProgram: {}", e))?;
            gl.attach_shader(program, vertex);
            gl.attach_shader(program, fragment);
            gl.bind_attrib_location(program, POSITION_LOCATION, "position");
            gl.bind_attrib_location(program, ATTRIBUTE_LOCATION, attribute);
            gl.link_program(program);

            gl.detach_shader(program, vertex);
            gl.detach_shader(program, fragment);
            gl.delete_shader(vertex);
            gl.delete_shader(fragment);

            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(compositor_error!(graphics_setup, "линковка программы: {}", log));
            }

            let viewport = gl.get_uniform_location(program, "viewport");
            if let Some(image) = gl.get_uniform_location(program, "image") {
                gl.use_program(Some(program));
                gl.uniform_1_i32(Some(&image), 0);
                gl.use_program(None);
            }

            Ok(Self {
                program,
                viewport,
                components,
            })
        }
    }

    /// Рисует веер из четырёх вершин; `vertices` уже чередует позицию и атрибут
    fn draw(&self, gl: &glow::Context, buffer: glow::Buffer, vertices: &[u8], viewport: (u32, u32)) {
        let stride = (2 + self.components) * 4;
        unsafe {
            gl.use_program(Some(self.program));
            gl.uniform_2_f32(self.viewport.as_ref(), viewport.0 as f32, viewport.1 as f32);

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, vertices, glow::STREAM_DRAW);
            gl.enable_vertex_attrib_array(POSITION_LOCATION);
            gl.vertex_attrib_pointer_f32(POSITION_LOCATION, 2, glow::FLOAT, false, stride, 0);
            gl.enable_vertex_attrib_array(ATTRIBUTE_LOCATION);
            gl.vertex_attrib_pointer_f32(ATTRIBUTE_LOCATION, self.components, glow::FLOAT, false, stride, 8);

            gl.draw_arrays(glow::TRIANGLE_FAN, 0, 4);

            gl.disable_vertex_attrib_array(ATTRIBUTE_LOCATION);
            gl.disable_vertex_attrib_array(POSITION_LOCATION);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.use_program(None);
        }
    }

    fn delete(&self, gl: &glow::Context) {
        unsafe { gl.delete_program(self.program) };
    }
}

unsafe fn compile_shader(gl: &glow::Context, shader_type: u32, source: &str) -> Result<glow::Shader> {
    let shader = gl
        .create_shader(shader_type)
        .map_err(|e| compositor_error!(graphics_setup, "glCreateShader: {}", e))?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);

    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(compositor_error!(graphics_setup, "компиляция шейдера {:#x}: {}", shader_type, log));
    }
    Ok(shader)
}

/// Все программы холста и общий вершинный буфер
pub struct QuadPrograms {
    colored: QuadProgram,
    rectangle: QuadProgram,
    texture_2d: QuadProgram,
    buffer: glow::Buffer,
    viewport: (u32, u32),
}

impl QuadPrograms {
    pub fn new(gl: &glow::Context, viewport: (u32, u32)) -> Result<Self> {
        let colored = QuadProgram::new(gl, VS_COLORED_SRC, FS_COLORED_SRC, "color", 3)?;
        let rectangle = QuadProgram::new(gl, VS_TEXTURED_SRC, FS_RECTANGLE_SRC, "tex_coord", 2)?;
        let texture_2d = QuadProgram::new(gl, VS_TEXTURED_SRC, FS_TEXTURE_2D_SRC, "tex_coord", 2)?;
        let buffer = unsafe { gl.create_buffer() }
            .map_err(|e| compositor_error!(graphics_setup, "glGenBuffers: {}", e))?;

        Ok(Self {
            colored,
            rectangle,
            texture_2d,
            buffer,
            viewport,
        })
    }

    pub fn draw_colored(&self, gl: &glow::Context, quad: &ColoredQuad) {
        self.colored.draw(gl, self.buffer, &colored_bytes(quad), self.viewport);
    }

    pub fn draw_textured(&self, gl: &glow::Context, normalized: bool, quad: &TexturedQuad) {
        let bytes = textured_bytes(quad);
        let program = if normalized {
            &self.texture_2d
        } else {
            &self.rectangle
        };
        program.draw(gl, self.buffer, &bytes, self.viewport);
    }

    pub fn delete(&self, gl: &glow::Context) {
        self.colored.delete(gl);
        self.rectangle.delete(gl);
        self.texture_2d.delete(gl);
        unsafe { gl.delete_buffer(self.buffer) };
    }
}

type VertexBytes = SmallVec<[u8; 128]>;

fn colored_bytes(quad: &ColoredQuad) -> VertexBytes {
    let mut bytes = VertexBytes::new();
    for vertex in &quad.vertices {
        push_floats(&mut bytes, &vertex.position);
        push_floats(&mut bytes, &vertex.color);
    }
    bytes
}

fn textured_bytes(quad: &TexturedQuad) -> VertexBytes {
    let mut bytes = VertexBytes::new();
    for vertex in &quad.vertices {
        push_floats(&mut bytes, &vertex.position);
        push_floats(&mut bytes, &vertex.tex_coord);
    }
    bytes
}

fn push_floats(bytes: &mut VertexBytes, values: &[f32]) {
    for value in values {
        bytes.extend_from_slice(&value.to_ne_bytes());
    }
}
