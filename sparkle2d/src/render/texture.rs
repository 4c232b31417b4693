/// Opaque handle used to reference textures owned by a GPU backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// A backend texture plus the pixel size the quad compositor needs for UVs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Texture {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    pub fn new(handle: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            handle,
            width,
            height,
        }
    }
}
