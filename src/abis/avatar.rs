use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IAvatarNft {
        function totalSupply() external view returns (uint256);
        function ownerOf(uint256 tokenId) external view returns (address);
        function fidOf(uint256 tokenId) external view returns (uint256);
        function avatarOf(uint256 tokenId) external view returns (string imageUrl, string style, uint64 mintedAt);
    }
}
