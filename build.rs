// Deeply recursive programs on the tree-walking evaluator need a large
// native stack in the binaries.
const STACK_SIZE: u64 = 128 * 1024 * 1024;

fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = std::env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();

    if target_os == "windows" && target_env == "msvc" {
        println!("cargo:rustc-link-arg-bins=/STACK:{}", STACK_SIZE);
    } else if target_os == "windows" && target_env == "gnu" {
        println!("cargo:rustc-link-arg-bins=-Wl,--stack,{}", STACK_SIZE);
    } else if target_os == "linux" {
        println!("cargo:rustc-link-arg-bins=-Wl,-z,stack-size={}", STACK_SIZE);
    } else if target_os == "macos" {
        println!("cargo:rustc-link-arg-bins=-Wl,-stack_size,{:#x}", STACK_SIZE);
    }
}
