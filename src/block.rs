use crate::dom::Node;

/// What kind of runtime value a block evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    /// Static structure built with `createBlock`, patched by data and children.
    Block,
    Text,
    Comment,
    Multi,
    List,
    Html,
}

/// One block of the generated code.
///
/// Blocks live in the generator's arena and refer to each other by id. The
/// id is also the suffix of the block's variable (`b3`) and constructor
/// (`block3`) names.
#[derive(Debug, Clone)]
pub(crate) struct BlockDescription {
    pub id: usize,
    pub kind: BlockKind,
    pub dynamic_tag_name: Option<String>,
    pub is_root: bool,
    pub has_dynamic_children: bool,
    pub children: Vec<usize>,
    pub data: Vec<String>,
    /// `c_blockN` when this block is an item of a list.
    pub parent_var: Option<String>,
    pub dom: Option<Node>,
    /// Path to the element currently receiving inserted nodes.
    pub current_dom: Option<Vec<usize>>,
}

impl BlockDescription {
    pub const fn new(id: usize, kind: BlockKind) -> Self {
        Self {
            id,
            kind,
            dynamic_tag_name: None,
            is_root: false,
            has_dynamic_children: false,
            children: Vec::new(),
            data: Vec::new(),
            parent_var: None,
            dom: None,
            current_dom: None,
        }
    }

    pub fn var_name(&self) -> String {
        var_name(self.id)
    }

    pub fn block_name(&self) -> String {
        format!("block{}", self.id)
    }

    /// Inserts `node` at the cursor, returning the path of the inserted node.
    ///
    /// Without a cursor the node replaces the block root.
    pub fn insert(&mut self, node: Node) -> Vec<usize> {
        let Some(path) = self.current_dom.as_ref() else {
            self.dom = Some(node);
            return Vec::new();
        };
        if let Some(Node::Element(root)) = self.dom.as_mut() {
            if root.append_at(path, node) {
                let mut inserted = path.clone();
                inserted.push(root.child_count_at(path).saturating_sub(1));
                return inserted;
            }
        }
        path.clone()
    }

    /// The expression evaluating to this block. `expr` is used as is for
    /// kinds without their own constructor.
    pub fn generate_expr(&self, expr: &str) -> String {
        match self.kind {
            BlockKind::Block => {
                let has_children = !self.children.is_empty();
                let mut params = if !self.data.is_empty() {
                    format!("[{}]", self.data.join(", "))
                } else if has_children {
                    "[]".to_string()
                } else {
                    String::new()
                };
                if has_children {
                    params.push_str(", [");
                    params.push_str(&self.child_vars().join(", "));
                    params.push(']');
                }
                match &self.dynamic_tag_name {
                    Some(tag) => format!("toggler({tag}, {}({tag})({params}))", self.block_name()),
                    None => format!("{}({params})", self.block_name()),
                }
            }
            BlockKind::List => format!("list(c_block{})", self.id),
            BlockKind::Text | BlockKind::Comment | BlockKind::Multi | BlockKind::Html => {
                expr.to_string()
            }
        }
    }

    /// Variable names of the child blocks, in insertion order.
    pub fn child_vars(&self) -> Vec<String> {
        self.children.iter().map(|id| var_name(*id)).collect()
    }
}

pub(crate) fn var_name(id: usize) -> String {
    format!("b{id}")
}
