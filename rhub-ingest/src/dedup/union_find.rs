//! Disjoint-set index over the batch arena
//!
//! Merge chains collapse transitively: if A merges with B and B with C, all
//! three resolve to one root regardless of arrival order.

/// Union-find with path compression and union by rank
#[derive(Debug, Default)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new singleton set, returning its index
    pub fn make_set(&mut self) -> usize {
        let idx = self.parent.len();
        self.parent.push(idx);
        self.rank.push(0);
        idx
    }

    /// Find the root of `x` with path compression
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Union the sets containing `a` and `b`, returning the new root
    pub fn union(&mut self, a: usize, b: usize) -> usize {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
            rb
        } else if self.rank[ra] > self.rank[rb] {
            self.parent[rb] = ra;
            ra
        } else {
            self.parent[rb] = ra;
            self.rank[ra] += 1;
            ra
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitive_chains_collapse_to_one_root() {
        let mut uf = UnionFind::new();
        let a = uf.make_set();
        let b = uf.make_set();
        let c = uf.make_set();

        uf.union(a, b);
        uf.union(b, c);

        let root = uf.find(a);
        assert_eq!(uf.find(b), root);
        assert_eq!(uf.find(c), root);
    }

    #[test]
    fn order_independence() {
        // Same pairs, opposite order: same partition
        let mut uf1 = UnionFind::new();
        let x: Vec<usize> = (0..4).map(|_| uf1.make_set()).collect();
        uf1.union(x[0], x[1]);
        uf1.union(x[2], x[3]);
        uf1.union(x[1], x[2]);

        let mut uf2 = UnionFind::new();
        let y: Vec<usize> = (0..4).map(|_| uf2.make_set()).collect();
        uf2.union(y[1], y[2]);
        uf2.union(y[2], y[3]);
        uf2.union(y[0], y[3]);

        let r1 = uf1.find(x[0]);
        assert!(x.iter().all(|&i| uf1.find(i) == r1));
        let r2 = uf2.find(y[0]);
        assert!(y.iter().all(|&i| uf2.find(i) == r2));
    }

    #[test]
    fn disjoint_sets_stay_disjoint() {
        let mut uf = UnionFind::new();
        let a = uf.make_set();
        let b = uf.make_set();
        assert_ne!(uf.find(a), uf.find(b));
    }
}
