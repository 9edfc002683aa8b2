use crate::error::GitSyncError;
use crate::objects::types::ObjectType;
use crate::sha::ObjectHash;
use std::fmt::{Display, Formatter};

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TreeItem {
    pub mode: String,
    pub name: String,
    pub id: ObjectHash,
}

impl Display for TreeItem {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} {} {}\t{}", self.mode, self.kind(), self.id, self.name)
    }
}

impl TreeItem {
    pub fn new(mode: impl Into<String>, name: impl Into<String>, id: ObjectHash) -> TreeItem {
        TreeItem {
            mode: mode.into(),
            name: name.into(),
            id,
        }
    }

    /// File modes (`100644`, `100755`, `120000`, ...) start with `1` and point at
    /// blobs; everything else is treated as a subtree.
    pub fn kind(&self) -> ObjectType {
        if self.mode.starts_with('1') {
            ObjectType::Blob
        } else {
            ObjectType::Tree
        }
    }

    pub fn to_data(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.mode.as_bytes());
        bytes.push(b' ');
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.push(b'\0');
        bytes.extend_from_slice(self.id.as_bytes());
        bytes
    }
}

pub fn parse_tree(input: &[u8]) -> Result<Vec<TreeItem>, GitSyncError> {
    let mut tree_items = Vec::new();
    let mut pos = 0;
    let input_len = input.len();
    while pos < input_len {
        let space_pos = input[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| GitSyncError::MalformedObject("tree entry missing mode".into()))?;
        let mode = String::from_utf8_lossy(&input[pos..pos + space_pos]).into_owned();

        pos += space_pos + 1;
        let null_pos = input[pos..]
            .iter()
            .position(|&b| b == b'\0')
            .ok_or_else(|| GitSyncError::MalformedObject("tree entry missing NUL".into()))?;
        let name = String::from_utf8_lossy(&input[pos..pos + null_pos]).into_owned();

        pos += null_pos + 1;
        if pos + ObjectHash::LEN > input_len {
            return Err(GitSyncError::MalformedObject(
                "tree entry hash truncated".into(),
            ));
        }
        let id = ObjectHash::from_slice(&input[pos..pos + ObjectHash::LEN])
            .ok_or_else(|| GitSyncError::MalformedObject("tree entry hash truncated".into()))?;
        pos += ObjectHash::LEN;
        tree_items.push(TreeItem { mode, name, id });
    }
    Ok(tree_items)
}

pub fn tree_references(content: &[u8]) -> Result<Vec<(ObjectHash, ObjectType)>, GitSyncError> {
    Ok(parse_tree(content)?
        .into_iter()
        .map(|item| (item.id, item.kind()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree() {
        let blob = ObjectHash::digest(b"blob 0\0");
        let sub = ObjectHash::digest(b"tree 0\0");
        let mut data = TreeItem::new("100644", "README.md", blob).to_data();
        data.extend(TreeItem::new("40000", "src", sub).to_data());
        data.extend(TreeItem::new("100755", "run.sh", blob).to_data());

        let items = parse_tree(&data).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].name, "README.md");
        assert_eq!(items[0].kind(), ObjectType::Blob);
        assert_eq!(items[1].kind(), ObjectType::Tree);
        assert_eq!(items[1].id, sub);
        assert_eq!(items[2].kind(), ObjectType::Blob);

        let refs = tree_references(&data).unwrap();
        assert_eq!(refs[1], (sub, ObjectType::Tree));
    }

    #[test]
    fn test_truncated_tree() {
        let blob = ObjectHash::digest(b"blob 0\0");
        let data = TreeItem::new("100644", "a", blob).to_data();
        assert!(parse_tree(&data[..data.len() - 1]).is_err());
        assert!(parse_tree(b"100644 no-nul").is_err());
        assert!(parse_tree(b"").unwrap().is_empty());
    }
}
