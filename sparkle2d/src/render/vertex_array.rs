/// CPU-side interleaved `f32` vertex storage.
#[derive(Debug)]
pub struct VertexArray {
    data: Vec<f32>,
    vertex_size: usize,
}

impl VertexArray {
    pub const INITIAL_VERTICES: usize = 256;

    /// `vertex_size` is the number of floats per vertex.
    pub fn new(vertex_size: usize) -> Self {
        Self {
            data: Vec::with_capacity(Self::INITIAL_VERTICES * vertex_size),
            vertex_size,
        }
    }

    /// # Panics
    /// If `vertex` does not hold exactly `vertex_size` floats.
    pub fn push_vertex(&mut self, vertex: &[f32]) {
        assert_eq!(
            vertex.len(),
            self.vertex_size,
            "vertex has {} components, layout expects {}",
            vertex.len(),
            self.vertex_size
        );
        if self.data.len() + vertex.len() > self.data.capacity() {
            let grow = self.data.capacity().max(vertex.len());
            self.data.reserve_exact(grow);
        }
        self.data.extend_from_slice(vertex);
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.data.len() / self.vertex_size
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity() / self.vertex_size
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
