// Build script to compile GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    compile_shader("shaders/quad.vert", "shaders/quad.vert.spv");
    compile_shader("shaders/quad.frag", "shaders/quad.frag.spv");
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output);
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            eprintln!("Warning: glslc not found ({})", e);
            eprintln!("Shaders will not be compiled. Install the Vulkan SDK or compile manually:");
            eprintln!("  glslc {} -o {}", input, output);
        }
    }
}
